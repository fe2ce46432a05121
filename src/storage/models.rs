use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author id used for comments posted by the curation validator.
pub const VALIDATOR_AUTHOR_ID: u64 = 810_112_564_787_675_166;

/// Who a submission was uploaded by, derived from the uploader's roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionLevel {
    Audition,
    Staff,
    Trial,
}

/// Comment actions. The wire form is kebab-case (`request-changes`, `upload-file`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Accept,
    Approve,
    AssignTesting,
    AssignVerification,
    Comment,
    MarkAdded,
    Reject,
    RequestChanges,
    System,
    UnassignTesting,
    UnassignVerification,
    UploadFile,
    Verify,
}

impl Action {
    pub fn parse(value: &str) -> Option<Self> {
        let action = match value {
            "accept" => Action::Accept,
            "approve" => Action::Approve,
            "assign-testing" => Action::AssignTesting,
            "assign-verification" => Action::AssignVerification,
            "comment" => Action::Comment,
            "mark-added" => Action::MarkAdded,
            "reject" => Action::Reject,
            "request-changes" => Action::RequestChanges,
            "system" => Action::System,
            "unassign-testing" => Action::UnassignTesting,
            "unassign-verification" => Action::UnassignVerification,
            "upload-file" => Action::UploadFile,
            "verify" => Action::Verify,
            _ => return None,
        };
        Some(action)
    }

    /// Actions that decide the state of a submission.
    pub fn is_decision(self) -> bool {
        matches!(
            self,
            Action::Approve
                | Action::AssignTesting
                | Action::AssignVerification
                | Action::Reject
                | Action::RequestChanges
                | Action::UnassignTesting
                | Action::UnassignVerification
                | Action::Verify
        )
    }
}

/// A login session, keyed by the hash of its secret
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: u64,
    pub submitter_id: u64,
    pub level: SubmissionLevel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub rejected: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delete_reason: Option<String>,
}

impl SubmissionRecord {
    /// Whether the submission counts against its owner's open-submission limit.
    pub fn is_open(&self) -> bool {
        !self.rejected && self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionFileRecord {
    pub id: u64,
    pub submission_id: u64,
    pub submitter_id: u64,
    pub original_filename: String,
    pub artifact_key: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub sha256: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: u64,
    pub submission_id: u64,
    pub author_id: u64,
    pub action: Action,
    #[serde(default)]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Structured curation metadata reported by the validator for one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurationMeta {
    pub submission_id: u64,
    pub file_id: u64,
    #[serde(default)]
    pub fields: HashMap<String, serde_json::Value>,
}

/// Summary row maintained by the recompute-submission-cache job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionSummary {
    pub submission_id: u64,
    pub file_count: u64,
    pub comment_count: u64,
    pub latest_action: Option<Action>,
    pub bot_action: Option<Action>,
    pub rejected: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: u64,
    pub original_filename: String,
    pub artifact_key: String,
    pub byte_size: u64,
    pub sha256: String,
    pub ingested_at: DateTime<Utc>,
    #[serde(default)]
    pub indexed: bool,
}

/// One file inside an indexed archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub path: String,
    pub size: u64,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Everything written when an assembled upload becomes a submission file.
/// Applied in a single write transaction by `Database::commit_submission`.
#[derive(Debug, Clone)]
pub struct SubmissionCommit {
    /// Existing submission to append to; `None` creates a new submission.
    pub target: Option<u64>,
    pub submitter_id: u64,
    pub level: SubmissionLevel,
    pub original_filename: String,
    pub artifact_key: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub sha256: String,
    pub meta: HashMap<String, serde_json::Value>,
    pub validator_action: Action,
    pub validator_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedSubmission {
    pub submission_id: u64,
    pub file_id: u64,
    pub created: bool,
}
