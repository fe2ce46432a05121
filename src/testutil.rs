//! Shared test helpers for curation-portal in-crate tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::{
    AuthConfig, Config, ServerConfig, ServicesConfig, StorageConfig, UploadConfig,
};
use crate::object_store::LocalStore;
use crate::storage::Database;
use crate::submissions::{Notification, Notifier, ValidationReport, Validator, ValidatorError};
use crate::AppState;

/// Validator returning a fixed report, or failing when `report` is `None`.
pub struct StubValidator {
    pub report: Option<ValidationReport>,
}

#[async_trait]
impl Validator for StubValidator {
    async fn validate(
        &self,
        _filename: &str,
        _artifact: Bytes,
    ) -> Result<ValidationReport, ValidatorError> {
        self.report
            .clone()
            .ok_or_else(|| ValidatorError::Unreachable("stub validator is down".to_string()))
    }
}

/// Notifier that keeps every event in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: Notification) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn test_config(temp_dir: &tempfile::TempDir) -> Config {
    Config {
        server: ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: temp_dir.path().join("data").to_string_lossy().to_string(),
        },
        storage: StorageConfig {
            artifact_path: temp_dir.path().join("artifacts").to_string_lossy().to_string(),
            ingest_dir: temp_dir.path().join("ingest").to_string_lossy().to_string(),
        },
        services: ServicesConfig::default(),
        uploads: UploadConfig {
            max_chunk_size: 1024 * 1024, // 1MB for tests
            audit_max_upload_size: 1024,
            audit_submission_limit: 1,
        },
        auth: AuthConfig::default(),
        test_mode: true,
    }
}

/// Create a test AppState with a temporary database, a local artifact store
/// and a validator that passes everything.
pub fn test_state(temp_dir: &tempfile::TempDir) -> (Arc<AppState>, Arc<RecordingNotifier>) {
    test_state_with(temp_dir, Some(ValidationReport::default()))
}

pub fn test_state_with(
    temp_dir: &tempfile::TempDir,
    report: Option<ValidationReport>,
) -> (Arc<AppState>, Arc<RecordingNotifier>) {
    let config = test_config(temp_dir);

    let db = Database::open(&config.server.data_dir).expect("Failed to open test database");
    let object_store = LocalStore::new(&config.storage.artifact_path)
        .expect("Failed to create test object store");
    let notifier = Arc::new(RecordingNotifier::default());

    let state = AppState::new(
        config,
        db,
        Arc::new(object_store),
        Arc::new(StubValidator { report }),
        notifier.clone(),
        None,
    );
    (Arc::new(state), notifier)
}
