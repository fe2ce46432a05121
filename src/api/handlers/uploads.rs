use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Serialize;

use super::upload_error;
use crate::api::response::{ApiError, AppQuery, JSend};
use crate::auth::UserId;
use crate::uploads::{ChunkMetadata, ChunkOutcome, UploadKey, UploadProgress};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    pub progress: UploadProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    pub present: bool,
}

/// resumable.js request fields, shared by the chunk POST and the probe GET.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResumableParams {
    identifier: String,
    /// 1-based on the wire.
    chunk_number: u64,
    total_chunks: u64,
    total_size: u64,
    current_chunk_size: Option<u64>,
    filename: String,
}

impl ResumableParams {
    fn from_fields(fields: &HashMap<String, String>) -> Result<Self, ApiError> {
        let chunk_number = required_number(fields, "resumableChunkNumber")?;
        if chunk_number == 0 {
            return Err(ApiError::bad_request("resumableChunkNumber starts at 1"));
        }

        Ok(Self {
            identifier: required(fields, "resumableIdentifier")?.to_string(),
            chunk_number,
            total_chunks: required_number(fields, "resumableTotalChunks")?,
            total_size: required_number(fields, "resumableTotalSize")?,
            current_chunk_size: fields
                .get("resumableCurrentChunkSize")
                .map(|v| parse_number("resumableCurrentChunkSize", v))
                .transpose()?,
            filename: fields
                .get("resumableFilename")
                .cloned()
                .unwrap_or_default(),
        })
    }

    fn index(&self) -> u64 {
        self.chunk_number - 1
    }

    fn metadata(&self, target: Option<u64>) -> Result<ChunkMetadata, ApiError> {
        let chunk_size = self
            .current_chunk_size
            .ok_or_else(|| ApiError::bad_request("missing field resumableCurrentChunkSize"))?;

        Ok(ChunkMetadata {
            index: self.index(),
            total_chunks: self.total_chunks,
            total_size: self.total_size,
            chunk_size,
            filename: self.filename.clone(),
            target,
        })
    }
}

fn required<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str, ApiError> {
    fields
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("missing field {name}")))
}

fn required_number(fields: &HashMap<String, String>, name: &str) -> Result<u64, ApiError> {
    parse_number(name, required(fields, name)?)
}

fn parse_number(name: &str, value: &str) -> Result<u64, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("{name} must be a non-negative integer")))
}

// ============================================================================
// Handlers
// ============================================================================

/// Receive one chunk. Serves both the new-submission route and the
/// append-to-submission route; the latter carries `submission-id`.
pub async fn receive_chunk(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    target: Option<Path<u64>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut fields = HashMap::new();
    let mut payload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        if field_name == "file" {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read chunk: {e}")))?;
            payload = Some(data);
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::bad_request(format!("Invalid {field_name}: {e}")))?;
            fields.insert(field_name, value);
        }
    }

    let params = ResumableParams::from_fields(&fields)?;
    let payload = payload.ok_or_else(|| ApiError::bad_request("missing chunk field file"))?;
    let metadata = params.metadata(target.map(|Path(id)| id))?;

    enforce_audit_size_cap(&state, user, metadata.total_size).await?;

    let key = UploadKey::new(user, &params.identifier).map_err(upload_error)?;
    let outcome = state
        .uploads
        .receive_chunk(&key, &metadata, &payload)
        .await
        .map_err(upload_error)?;

    let response = match outcome {
        ChunkOutcome::Stored(progress) => (
            StatusCode::OK,
            JSend::success(ChunkResponse {
                progress,
                url: None,
            }),
        ),
        ChunkOutcome::Completed {
            progress,
            submission_id,
        } => {
            tracing::info!(
                user_id = %user,
                identifier = %params.identifier,
                submission_id,
                "upload assembled"
            );
            (
                StatusCode::CREATED,
                JSend::success(ChunkResponse {
                    progress,
                    url: Some(format!("/api/submissions/{submission_id}")),
                }),
            )
        }
    };

    Ok(response.into_response())
}

/// Ask whether a chunk is already stored: 200 when present, 204 otherwise.
pub async fn probe_chunk(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    AppQuery(query): AppQuery<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let identifier = required(&query, "resumableIdentifier")?;
    let chunk_number = required_number(&query, "resumableChunkNumber")?;
    if chunk_number == 0 {
        return Err(ApiError::bad_request("resumableChunkNumber starts at 1"));
    }

    let key = UploadKey::new(user, identifier).map_err(upload_error)?;
    let present = state
        .uploads
        .probe_chunk(&key, chunk_number - 1)
        .map_err(upload_error)?;

    if present {
        Ok(JSend::success(ProbeResponse { present }).into_response())
    } else {
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

pub async fn upload_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    Path(identifier): Path<String>,
) -> Result<Json<JSend<UploadProgress>>, ApiError> {
    let key = UploadKey::new(user, &identifier).map_err(upload_error)?;

    state
        .uploads
        .get_progress(&key)
        .map(JSend::success)
        .ok_or_else(|| ApiError::not_found(format!("no upload '{identifier}'")))
}

/// Identities in audit may not declare uploads above the configured cap.
async fn enforce_audit_size_cap(
    state: &AppState,
    user: UserId,
    total_size: u64,
) -> Result<(), ApiError> {
    let cap = state.config.uploads.audit_max_upload_size;
    if total_size <= cap {
        return Ok(());
    }

    let roles = state
        .engine
        .identities()
        .role_set_of(user)
        .await
        .map_err(|e| {
            tracing::warn!(user_id = %user, error = %e, "role lookup failed");
            ApiError::internal("failed to look up roles")
        })?;

    if roles.is_in_audit() {
        return Err(ApiError::forbidden(format!(
            "uploads in audit are limited to {cap} bytes"
        )));
    }
    Ok(())
}
