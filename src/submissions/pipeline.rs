use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{info, warn};

use super::{submission_level, validator_verdict, AssemblyError, Notification, Notifier, Validator};
use crate::auth::IdentityStore;
use crate::object_store::{artifact_key, ObjectStore};
use crate::storage::models::SubmissionCommit;
use crate::storage::Database;
use crate::uploads::{Assembler, ChunkMetadata, ChunkStore, UploadKey};

/// Assembles a completed upload into a submission file.
///
/// Steps: concatenate, verify length, checksum, persist the artifact,
/// validate, commit the records in one transaction, notify. The artifact is
/// removed again if anything after persisting fails.
pub struct SubmissionAssembler {
    db: Database,
    object_store: Arc<dyn ObjectStore>,
    identities: Arc<dyn IdentityStore>,
    validator: Arc<dyn Validator>,
    notifier: Arc<dyn Notifier>,
}

impl SubmissionAssembler {
    pub fn new(
        db: Database,
        object_store: Arc<dyn ObjectStore>,
        identities: Arc<dyn IdentityStore>,
        validator: Arc<dyn Validator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            object_store,
            identities,
            validator,
            notifier,
        }
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.object_store.delete(key).await {
            warn!(artifact = key, error = %e, "failed to discard artifact");
        }
    }
}

#[async_trait]
impl Assembler for SubmissionAssembler {
    async fn assemble(
        &self,
        key: &UploadKey,
        metadata: &ChunkMetadata,
        chunks: &ChunkStore,
    ) -> Result<u64, AssemblyError> {
        let assembled = chunks.concat(key, metadata.total_chunks)?;
        if assembled.len() as u64 != metadata.total_size {
            return Err(AssemblyError::LengthMismatch {
                declared: metadata.total_size,
                actual: assembled.len() as u64,
            });
        }

        let sha256 = hex::encode(ring::digest::digest(&ring::digest::SHA256, &assembled));
        if let Some(file_id) = self.db.file_id_by_checksum(&sha256)? {
            return Err(AssemblyError::Duplicate(format!(
                "file '{}' with checksum sha256:{sha256} already present as file {file_id}",
                metadata.filename
            )));
        }

        let byte_size = assembled.len() as u64;
        let data = Bytes::from(assembled);
        let artifact = artifact_key("submissions", &metadata.filename);
        let location = self.object_store.put(&artifact, data.clone()).await?;
        info!(upload_id = %key, %location, byte_size, "artifact persisted");

        let report = match self.validator.validate(&metadata.filename, data).await {
            Ok(report) => report,
            Err(e) => {
                self.discard(&artifact).await;
                return Err(e.into());
            }
        };

        let roles = match self.identities.role_set_of(key.owner).await {
            Ok(roles) => roles,
            Err(e) => {
                self.discard(&artifact).await;
                return Err(AssemblyError::Roles(e));
            }
        };

        let (validator_action, validator_message) = validator_verdict(&report);
        let commit = SubmissionCommit {
            target: metadata.target,
            submitter_id: key.owner.0,
            level: submission_level(&roles),
            original_filename: metadata.filename.clone(),
            artifact_key: artifact.clone(),
            mime_type: mime_guess::from_path(&metadata.filename)
                .first_or_octet_stream()
                .to_string(),
            byte_size,
            sha256,
            meta: report.meta,
            validator_action,
            validator_message,
        };

        let committed = match self.db.commit_submission(&commit) {
            Ok(committed) => committed,
            Err(e) => {
                self.discard(&artifact).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.db.recompute_submission_summary(committed.submission_id) {
            warn!(submission_id = committed.submission_id, error = %e, "failed to refresh submission summary");
        }

        info!(
            upload_id = %key,
            submission_id = committed.submission_id,
            file_id = committed.file_id,
            created = committed.created,
            action = ?validator_action,
            "submission committed"
        );

        self.notifier.notify(Notification::SubmissionUploaded {
            submission_id: committed.submission_id,
            file_id: committed.file_id,
            uploader: key.owner,
            created: committed.created,
            validator_action,
        });

        Ok(committed.submission_id)
    }
}
