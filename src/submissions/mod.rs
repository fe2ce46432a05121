//! Turning assembled uploads into submissions.

mod notifier;
mod pipeline;
mod validator;

use thiserror::Error;

use crate::auth::{LookupError, RoleGroup, RoleSet};
use crate::object_store::ObjectStoreError;
use crate::storage::models::{Action, SubmissionLevel};
use crate::storage::DatabaseError;

pub use notifier::{LogNotifier, Notification, Notifier, WebhookNotifier};
pub use pipeline::SubmissionAssembler;
pub use validator::{HttpValidator, NoopValidator, ValidationReport, Validator, ValidatorError};

pub const APPROVAL_MESSAGE: &str = "Looks good to me! 🤖";

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("chunk {0} is missing")]
    MissingChunk(u64),
    #[error("assembled {actual} bytes but {declared} were declared")]
    LengthMismatch { declared: u64, actual: u64 },
    #[error("duplicate file: {0}")]
    Duplicate(String),
    #[error("target not found: {0}")]
    TargetNotFound(String),
    #[error(transparent)]
    Validator(#[from] ValidatorError),
    #[error("artifact store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("failed to resolve uploader roles: {0}")]
    Roles(LookupError),
    #[error("storage error: {0}")]
    Storage(DatabaseError),
}

impl From<DatabaseError> for AssemblyError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Conflict(msg) => AssemblyError::Duplicate(msg),
            DatabaseError::NotFound(msg) => AssemblyError::TargetNotFound(msg),
            other => AssemblyError::Storage(other),
        }
    }
}

/// Level recorded on a new submission, from the uploader's roles.
pub fn submission_level(roles: &RoleSet) -> SubmissionLevel {
    if roles.intersects(RoleGroup::Staff) {
        SubmissionLevel::Staff
    } else if roles.intersects(RoleGroup::TrialCurator) {
        SubmissionLevel::Trial
    } else {
        SubmissionLevel::Audition
    }
}

/// The validator's comment: approve when clean, otherwise request changes
/// listing every error and warning.
pub fn validator_verdict(report: &ValidationReport) -> (Action, String) {
    if report.is_clean() {
        return (Action::Approve, APPROVAL_MESSAGE.to_string());
    }

    let mut message = String::new();
    if !report.curation_errors.is_empty() {
        message.push_str("Your curation is invalid:\n");
    } else {
        message.push_str("Your curation might have some problems:\n");
    }
    for finding in report
        .curation_errors
        .iter()
        .chain(report.curation_warnings.iter())
    {
        message.push_str(&format!("🚫 {finding}\n"));
    }

    (Action::RequestChanges, message)
}
