use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use curation_portal::{
    api,
    config::Config,
    jobs::{ArchiveIndexer, HttpArchiveIndexer},
    object_store as obj,
    storage::Database,
    submissions::{HttpValidator, LogNotifier, NoopValidator, Notifier, Validator, WebhookNotifier},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "curation-portal starting");

    // Load configuration
    let config = Config::load()?;

    // Initialize database
    let db = Database::open(&config.server.data_dir)?;
    info!("Database opened at: {}", config.server.data_dir);

    let object_store: Arc<dyn obj::ObjectStore> =
        Arc::new(obj::LocalStore::new(&config.storage.artifact_path)?);
    info!("Artifacts stored at: {}", config.storage.artifact_path);

    // External services
    let validator: Arc<dyn Validator> = match config.services.validator_url.as_deref() {
        Some(url) => {
            info!(url, "Using curation validator");
            Arc::new(HttpValidator::new(url)?)
        }
        None => {
            tracing::warn!("No validator configured; every package will pass validation");
            Arc::new(NoopValidator)
        }
    };

    let notifier: Arc<dyn Notifier> = match config.services.notification_webhook_url.as_deref() {
        Some(url) => Arc::new(WebhookNotifier::new(url)?),
        None => Arc::new(LogNotifier),
    };

    let indexer = match config.services.archive_indexer_url.as_deref() {
        Some(url) => Some(Arc::new(HttpArchiveIndexer::new(url)?) as Arc<dyn ArchiveIndexer>),
        None => None,
    };

    // Create shared state
    let state = Arc::new(AppState::new(
        config.clone(),
        db,
        object_store,
        validator,
        notifier,
        indexer,
    ));

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    info!("Listening on: {}", config.server.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(
        open_uploads = state.uploads.tracked_uploads(),
        "Shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
