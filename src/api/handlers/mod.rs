mod admin;
mod submissions;
mod uploads;

use crate::api::response::ApiError;
use crate::jobs::JobError;
use crate::submissions::AssemblyError;
use crate::uploads::UploadError;

pub use admin::{
    admin_create_session, admin_purge, delete_user_sessions, health, job_status, trigger_job,
};
pub use submissions::{add_comments, delete_submission, get_submission};
pub use uploads::{probe_chunk, receive_chunk, upload_status};

/// Map an UploadError to an ApiError
fn upload_error(e: UploadError) -> ApiError {
    match e {
        UploadError::InvalidIdentifier(_)
        | UploadError::InvalidChunk(_)
        | UploadError::SizeMismatch { .. }
        | UploadError::TotalsMismatch(_)
        | UploadError::UnsupportedFileType(_) => ApiError::bad_request(e.to_string()),
        UploadError::Assembly(inner) => assembly_error(inner),
        UploadError::Storage(inner) => {
            tracing::error!(error = %inner, "chunk storage failure");
            ApiError::internal("failed to store chunk")
        }
    }
}

fn assembly_error(e: AssemblyError) -> ApiError {
    match e {
        AssemblyError::MissingChunk(_) | AssemblyError::LengthMismatch { .. } => {
            ApiError::bad_request(e.to_string())
        }
        AssemblyError::Duplicate(_) => ApiError::conflict(e.to_string()),
        AssemblyError::TargetNotFound(_) => ApiError::not_found(e.to_string()),
        AssemblyError::Validator(_) => ApiError::bad_gateway(e.to_string()),
        AssemblyError::ObjectStore(_) | AssemblyError::Roles(_) | AssemblyError::Storage(_) => {
            ApiError::internal(e.to_string())
        }
    }
}

/// Map a JobError to an ApiError
fn job_error(e: JobError) -> ApiError {
    match e {
        JobError::AlreadyRunning(_) => ApiError::conflict(e.to_string()),
        JobError::UnknownKind(_) => ApiError::not_found(e.to_string()),
        JobError::NotConfigured(..) => ApiError::unavailable(e.to_string()),
        other => ApiError::internal(other.to_string()),
    }
}
