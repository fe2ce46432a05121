use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::job_error;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::auth::{AuthToken, UserId};
use crate::jobs::{self, JobError, JobKind};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct JobStatus {
    pub job: JobKind,
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct JobTriggerResponse {
    pub job: JobKind,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct SessionsDeletedResponse {
    pub user_id: UserId,
    pub sessions_deleted: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: u64,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: UserId,
    pub secret: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub archives_deleted: u64,
    pub chunks_deleted: u64,
    pub sessions_deleted: u64,
    pub submissions_deleted: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn job_status(State(state): State<Arc<AppState>>) -> Json<JSend<Vec<JobStatus>>> {
    let jobs = state
        .jobs
        .status()
        .into_iter()
        .map(|(job, running)| JobStatus { job, running })
        .collect();
    JSend::success(jobs)
}

/// Start a job unless one of the same kind is already running.
pub async fn trigger_job(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<JSend<JobTriggerResponse>>), ApiError> {
    let kind = JobKind::parse(&name).ok_or_else(|| job_error(JobError::UnknownKind(name)))?;

    let db = state.db.clone();
    let started = match kind {
        JobKind::RecomputeSubmissionCache => state
            .jobs
            .spawn(kind, jobs::recompute_submission_cache(db)),
        JobKind::IngestArchives => state.jobs.spawn(
            kind,
            jobs::ingest_archives(
                db,
                Arc::clone(&state.object_store),
                PathBuf::from(&state.config.storage.ingest_dir),
            ),
        ),
        JobKind::IndexArchives => match &state.indexer {
            Some(indexer) => state.jobs.spawn(
                kind,
                jobs::index_archives(db, Arc::clone(&state.object_store), Arc::clone(indexer)),
            ),
            None => Err(JobError::NotConfigured(
                kind,
                "ARCHIVE_INDEXER_URL is not set".to_string(),
            )),
        },
    };

    started.map_err(|e| {
        tracing::info!(job = %kind, user_id = %user, error = %e, "job trigger refused");
        job_error(e)
    })?;

    tracing::info!(job = %kind, user_id = %user, "job triggered");
    Ok((
        StatusCode::ACCEPTED,
        JSend::success(JobTriggerResponse {
            job: kind,
            status: "started".to_string(),
        }),
    ))
}

/// Log a user out everywhere.
pub async fn delete_user_sessions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<u64>,
) -> Result<Json<JSend<SessionsDeletedResponse>>, ApiError> {
    if user_id == 0 {
        return Err(ApiError::bad_request("invalid user id 0"));
    }

    let sessions_deleted = state.db.delete_user_sessions(user_id)?;
    tracing::info!(user_id, sessions_deleted, "user sessions deleted");

    Ok(JSend::success(SessionsDeletedResponse {
        user_id: UserId(user_id),
        sessions_deleted,
    }))
}

/// Mint a session with the given roles. Test mode only.
pub async fn admin_create_session(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<CreateSessionRequest>,
) -> Result<Json<JSend<SessionResponse>>, ApiError> {
    if request.user_id == 0 {
        return Err(ApiError::bad_request("user_id must be non-zero"));
    }

    let secret = uuid::Uuid::new_v4().to_string();
    let ttl = i64::try_from(state.config.auth.session_ttl_seconds).unwrap_or(i64::MAX);
    let expires_at = Utc::now() + Duration::try_seconds(ttl).unwrap_or(Duration::days(30));

    state
        .db
        .create_session(&secret, request.user_id, expires_at)?;
    state.db.set_user_roles(request.user_id, &request.roles)?;

    let token = AuthToken {
        secret: secret.clone(),
        user_id: request.user_id.to_string(),
    }
    .encode();

    tracing::warn!(user_id = request.user_id, roles = ?request.roles, "session minted");

    Ok(JSend::success(SessionResponse {
        user_id: UserId(request.user_id),
        secret,
        token,
        expires_at,
    }))
}

pub async fn admin_purge(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<PurgeResponse>>, ApiError> {
    let stats = state
        .db
        .purge_all()
        .map_err(|e| ApiError::internal(e.to_string()))?;
    state.uploads.reset();
    state.jobs.reset();

    tracing::warn!(
        submissions = stats.submissions,
        archives = stats.archives,
        "Purged all data"
    );

    Ok(JSend::success(PurgeResponse {
        archives_deleted: stats.archives,
        chunks_deleted: stats.chunks,
        sessions_deleted: stats.sessions,
        submissions_deleted: stats.submissions,
    }))
}
