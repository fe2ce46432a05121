use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::auth::UserId;
use crate::storage::models::{
    Action, CommentRecord, CurationMeta, SubmissionFileRecord, SubmissionRecord,
    SubmissionSummary,
};
use crate::submissions::Notification;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub submission: SubmissionRecord,
    pub files: Vec<SubmissionFileResponse>,
    pub comments: Vec<CommentRecord>,
    pub summary: Option<SubmissionSummary>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionFileResponse {
    #[serde(flatten)]
    pub file: SubmissionFileRecord,
    pub curation_meta: Option<CurationMeta>,
}

#[derive(Debug, Deserialize)]
pub struct CommentParams {
    pub action: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommentRequest {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommentsResponse {
    pub comment_ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub submission_id: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<u64>,
) -> Result<Json<JSend<SubmissionResponse>>, ApiError> {
    let submission = state
        .db
        .get_submission(submission_id)?
        .filter(|s| s.deleted_at.is_none())
        .ok_or_else(|| ApiError::not_found(format!("submission {submission_id} not found")))?;

    let mut files = Vec::new();
    for file in state.db.get_submission_files(submission_id)? {
        let curation_meta = state.db.get_curation_meta(file.id)?;
        files.push(SubmissionFileResponse {
            file,
            curation_meta,
        });
    }

    Ok(JSend::success(SubmissionResponse {
        submission,
        files,
        comments: state.db.get_comments(submission_id)?,
        summary: state.db.get_submission_summary(submission_id)?,
    }))
}

/// Post one comment on every submission in the comma-separated id list.
pub async fn add_comments(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    Path(raw_ids): Path<String>,
    AppQuery(params): AppQuery<CommentParams>,
    body: Option<AppJson<CommentRequest>>,
) -> Result<Json<JSend<CommentsResponse>>, ApiError> {
    let action = Action::parse(&params.action)
        .filter(|a| !matches!(a, Action::System | Action::UploadFile))
        .ok_or_else(|| ApiError::bad_request(format!("invalid action '{}'", params.action)))?;

    let submission_ids = parse_id_list(&raw_ids)?;
    let message = body
        .map(|AppJson(request)| request)
        .unwrap_or_default()
        .message
        .filter(|m| !m.trim().is_empty());

    if action == Action::Comment && message.is_none() {
        return Err(ApiError::bad_request("a comment needs a message"));
    }

    let comment_ids = state
        .db
        .add_comments(&submission_ids, user.0, action, message.as_deref())?;

    for &submission_id in &submission_ids {
        if let Err(e) = state.db.recompute_submission_summary(submission_id) {
            tracing::warn!(submission_id, error = %e, "failed to refresh submission summary");
        }
    }

    tracing::info!(user_id = %user, ?submission_ids, ?action, "comments added");
    state.notifier.notify(Notification::SubmissionsCommented {
        submission_ids,
        author: user,
        action,
    });

    Ok(JSend::success(CommentsResponse { comment_ids }))
}

pub async fn delete_submission(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    Path(submission_id): Path<u64>,
    AppQuery(params): AppQuery<DeleteParams>,
) -> Result<Json<JSend<DeleteResponse>>, ApiError> {
    let reason = params
        .reason
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("a deletion needs a reason"))?;

    if !state.db.soft_delete_submission(submission_id, &reason)? {
        return Err(ApiError::not_found(format!(
            "submission {submission_id} not found"
        )));
    }

    if let Err(e) = state.db.recompute_submission_summary(submission_id) {
        tracing::warn!(submission_id, error = %e, "failed to refresh submission summary");
    }

    tracing::warn!(user_id = %user, submission_id, %reason, "submission deleted");
    state.notifier.notify(Notification::SubmissionDeleted {
        submission_id,
        deleted_by: user,
    });

    Ok(JSend::success(DeleteResponse { submission_id }))
}

fn parse_id_list(raw: &str) -> Result<Vec<u64>, ApiError> {
    let mut ids = Vec::new();
    for part in raw.split(',') {
        let id = part
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|id| *id != 0)
            .ok_or_else(|| ApiError::bad_request(format!("invalid submission id '{part}'")))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}
