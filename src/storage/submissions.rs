use async_trait::async_trait;
use chrono::Utc;
use redb::{ReadableTable, WriteTransaction};

use super::db::{next_id, Database, DatabaseError};
use super::models::{
    Action, CommentRecord, CommittedSubmission, CurationMeta, SubmissionCommit,
    SubmissionFileRecord, SubmissionRecord, SubmissionSummary, VALIDATOR_AUTHOR_ID,
};
use super::tables::*;
use crate::auth::{LookupError, ResourceKind, ResourceStore, UserId};

impl Database {
    // ========================================================================
    // Submission operations
    // ========================================================================

    /// Write the submission row, file row, checksum index, upload comment,
    /// curation meta and validator comment in one transaction.
    ///
    /// A checksum that is already indexed is a conflict and nothing is written.
    pub fn commit_submission(
        &self,
        commit: &SubmissionCommit,
    ) -> Result<CommittedSubmission, DatabaseError> {
        debug_assert!(commit.submitter_id != 0, "submitter must be a real user");

        let write_txn = self.begin_write()?;
        let now = Utc::now();

        {
            let checksums = write_txn.open_table(FILE_CHECKSUMS)?;
            if let Some(existing) = checksums.get(commit.sha256.as_str())? {
                return Err(DatabaseError::Conflict(format!(
                    "file '{}' with checksum sha256:{} already present as file {}",
                    commit.original_filename,
                    commit.sha256,
                    existing.value()
                )));
            };
        }

        let (submission_id, created) = match commit.target {
            Some(id) => {
                let mut submission = read_submission(&write_txn, id)?
                    .ok_or_else(|| DatabaseError::NotFound(format!("submission {id}")))?;
                submission.updated_at = now;
                write_submission(&write_txn, &submission)?;
                (id, false)
            }
            None => {
                let id = next_id(&write_txn, "submissions")?;
                let submission = SubmissionRecord {
                    id,
                    submitter_id: commit.submitter_id,
                    level: commit.level,
                    created_at: now,
                    updated_at: now,
                    rejected: false,
                    deleted_at: None,
                    delete_reason: None,
                };
                write_submission(&write_txn, &submission)?;
                index_owner(&write_txn, commit.submitter_id, id)?;
                (id, true)
            }
        };

        let file_id = next_id(&write_txn, "submission_files")?;
        let file = SubmissionFileRecord {
            id: file_id,
            submission_id,
            submitter_id: commit.submitter_id,
            original_filename: commit.original_filename.clone(),
            artifact_key: commit.artifact_key.clone(),
            mime_type: commit.mime_type.clone(),
            byte_size: commit.byte_size,
            sha256: commit.sha256.clone(),
            uploaded_at: now,
        };
        {
            let mut files = write_txn.open_table(SUBMISSION_FILES)?;
            let data = rmp_serde::to_vec_named(&file)?;
            files.insert(file_id, data.as_slice())?;

            let mut checksums = write_txn.open_table(FILE_CHECKSUMS)?;
            checksums.insert(commit.sha256.as_str(), file_id)?;
        }

        write_comment(
            &write_txn,
            submission_id,
            commit.submitter_id,
            Action::UploadFile,
            None,
            now,
        )?;

        {
            let meta = CurationMeta {
                submission_id,
                file_id,
                fields: commit.meta.clone(),
            };
            let mut table = write_txn.open_table(CURATION_META)?;
            let data = rmp_serde::to_vec_named(&meta)?;
            table.insert(file_id, data.as_slice())?;
        }

        write_comment(
            &write_txn,
            submission_id,
            VALIDATOR_AUTHOR_ID,
            commit.validator_action,
            Some(commit.validator_message.clone()),
            now,
        )?;

        write_txn.commit()?;

        Ok(CommittedSubmission {
            submission_id,
            file_id,
            created,
        })
    }

    /// Get a submission by id
    pub fn get_submission(&self, id: u64) -> Result<Option<SubmissionRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SUBMISSIONS)?;

        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Get all submissions (for the recompute job)
    pub fn get_all_submissions(&self) -> Result<Vec<SubmissionRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SUBMISSIONS)?;

        let mut submissions = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            submissions.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(submissions)
    }

    /// Get the submissions a user has uploaded, via the owner index
    pub fn get_submissions_by_owner(
        &self,
        user_id: u64,
    ) -> Result<Vec<SubmissionRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let owner_table = read_txn.open_table(USER_SUBMISSIONS)?;
        let submissions_table = read_txn.open_table(SUBMISSIONS)?;

        let ids: Vec<u64> = match owner_table.get(user_id)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(Vec::new()),
        };

        let mut submissions = Vec::new();
        for id in ids {
            if let Some(data) = submissions_table.get(id)? {
                submissions.push(rmp_serde::from_slice(data.value())?);
            }
        }
        Ok(submissions)
    }

    /// Get a submission file by id
    pub fn get_submission_file(
        &self,
        id: u64,
    ) -> Result<Option<SubmissionFileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SUBMISSION_FILES)?;

        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Get all files of a submission, oldest first
    pub fn get_submission_files(
        &self,
        submission_id: u64,
    ) -> Result<Vec<SubmissionFileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SUBMISSION_FILES)?;

        let mut files = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let file: SubmissionFileRecord = rmp_serde::from_slice(value.value())?;
            if file.submission_id == submission_id {
                files.push(file);
            }
        }
        Ok(files)
    }

    /// Get all comments of a submission in posting order
    pub fn get_comments(&self, submission_id: u64) -> Result<Vec<CommentRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(COMMENTS)?;

        let mut comments = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let comment: CommentRecord = rmp_serde::from_slice(value.value())?;
            if comment.submission_id == submission_id {
                comments.push(comment);
            }
        }
        comments.sort_by_key(|c| c.id);
        Ok(comments)
    }

    /// Get the curation meta stored for a file
    pub fn get_curation_meta(&self, file_id: u64) -> Result<Option<CurationMeta>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CURATION_META)?;

        match table.get(file_id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Id of the submission file with this sha256, if one was committed
    pub fn file_id_by_checksum(&self, sha256: &str) -> Result<Option<u64>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILE_CHECKSUMS)?;
        Ok(table.get(sha256)?.map(|v| v.value()))
    }

    /// Post the same comment on several submissions at once.
    /// A reject action also flags the submission as rejected.
    pub fn add_comments(
        &self,
        submission_ids: &[u64],
        author_id: u64,
        action: Action,
        message: Option<&str>,
    ) -> Result<Vec<u64>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let now = Utc::now();
        let mut comment_ids = Vec::with_capacity(submission_ids.len());

        for &submission_id in submission_ids {
            let mut submission = read_submission(&write_txn, submission_id)?
                .ok_or_else(|| DatabaseError::NotFound(format!("submission {submission_id}")))?;

            if action == Action::Reject {
                submission.rejected = true;
            }
            submission.updated_at = now;
            write_submission(&write_txn, &submission)?;

            let id = write_comment(
                &write_txn,
                submission_id,
                author_id,
                action,
                message.map(|m| m.to_string()),
                now,
            )?;
            comment_ids.push(id);
        }

        write_txn.commit()?;
        Ok(comment_ids)
    }

    /// Mark a submission deleted; returns false when it does not exist
    pub fn soft_delete_submission(&self, id: u64, reason: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let deleted = match read_submission(&write_txn, id)? {
            Some(mut submission) => {
                let now = Utc::now();
                submission.deleted_at = Some(now);
                submission.delete_reason = Some(reason.to_string());
                submission.updated_at = now;
                write_submission(&write_txn, &submission)?;
                true
            }
            None => false,
        };

        write_txn.commit()?;
        Ok(deleted)
    }

    // ========================================================================
    // Submission cache
    // ========================================================================

    /// Recompute and store the summary row for one submission
    pub fn recompute_submission_summary(
        &self,
        submission_id: u64,
    ) -> Result<Option<SubmissionSummary>, DatabaseError> {
        let Some(submission) = self.get_submission(submission_id)? else {
            return Ok(None);
        };
        let files = self.get_submission_files(submission_id)?;
        let comments = self.get_comments(submission_id)?;

        let summary = SubmissionSummary {
            submission_id,
            file_count: files.len() as u64,
            comment_count: comments.len() as u64,
            latest_action: comments
                .iter()
                .rev()
                .find(|c| c.action != Action::Comment && c.author_id != VALIDATOR_AUTHOR_ID)
                .map(|c| c.action),
            bot_action: comments
                .iter()
                .rev()
                .find(|c| c.author_id == VALIDATOR_AUTHOR_ID)
                .map(|c| c.action),
            rejected: submission.rejected,
            updated_at: Utc::now(),
        };

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(SUBMISSION_CACHE)?;
            let data = rmp_serde::to_vec_named(&summary)?;
            table.insert(submission_id, data.as_slice())?;
        }
        write_txn.commit()?;

        Ok(Some(summary))
    }

    /// Get the cached summary of a submission
    pub fn get_submission_summary(
        &self,
        submission_id: u64,
    ) -> Result<Option<SubmissionSummary>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SUBMISSION_CACHE)?;

        match table.get(submission_id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Ownership lookups
    // ========================================================================

    /// Owner of a resource, `None` when the resource does not exist
    pub fn owner_of(&self, kind: ResourceKind, id: u64) -> Result<Option<u64>, DatabaseError> {
        match kind {
            ResourceKind::Submission => Ok(self.get_submission(id)?.map(|s| s.submitter_id)),
            ResourceKind::SubmissionFile => {
                Ok(self.get_submission_file(id)?.map(|f| f.submitter_id))
            }
        }
    }

    /// Number of resources of `kind` a user currently holds.
    /// Rejected and deleted submissions do not count.
    pub fn count_owned(&self, kind: ResourceKind, user_id: u64) -> Result<u64, DatabaseError> {
        match kind {
            ResourceKind::Submission => Ok(self
                .get_submissions_by_owner(user_id)?
                .iter()
                .filter(|s| s.is_open())
                .count() as u64),
            ResourceKind::SubmissionFile => {
                let read_txn = self.begin_read()?;
                let table = read_txn.open_table(SUBMISSION_FILES)?;
                let mut count = 0;
                for result in table.iter()? {
                    let (_, value) = result?;
                    let file: SubmissionFileRecord = rmp_serde::from_slice(value.value())?;
                    if file.submitter_id == user_id {
                        count += 1;
                    }
                }
                Ok(count)
            }
        }
    }
}

#[async_trait]
impl ResourceStore for Database {
    async fn owner_of(&self, kind: ResourceKind, id: u64) -> Result<Option<UserId>, LookupError> {
        Ok(Database::owner_of(self, kind, id)?.map(UserId))
    }

    async fn count_owned(&self, kind: ResourceKind, user: UserId) -> Result<u64, LookupError> {
        Ok(Database::count_owned(self, kind, user.0)?)
    }
}

// ============================================================================
// Transaction helpers
// ============================================================================

fn read_submission(
    txn: &WriteTransaction,
    id: u64,
) -> Result<Option<SubmissionRecord>, DatabaseError> {
    let table = txn.open_table(SUBMISSIONS)?;
    let result = match table.get(id)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };
    Ok(result)
}

fn write_submission(
    txn: &WriteTransaction,
    submission: &SubmissionRecord,
) -> Result<(), DatabaseError> {
    let mut table = txn.open_table(SUBMISSIONS)?;
    let data = rmp_serde::to_vec_named(submission)?;
    table.insert(submission.id, data.as_slice())?;
    Ok(())
}

fn index_owner(txn: &WriteTransaction, user_id: u64, submission_id: u64) -> Result<(), DatabaseError> {
    let mut table = txn.open_table(USER_SUBMISSIONS)?;
    let mut ids: Vec<u64> = match table.get(user_id)? {
        Some(data) => rmp_serde::from_slice(data.value())?,
        None => Vec::new(),
    };

    if !ids.contains(&submission_id) {
        ids.push(submission_id);
        let data = rmp_serde::to_vec_named(&ids)?;
        table.insert(user_id, data.as_slice())?;
    }
    Ok(())
}

fn write_comment(
    txn: &WriteTransaction,
    submission_id: u64,
    author_id: u64,
    action: Action,
    message: Option<String>,
    created_at: chrono::DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    let id = next_id(txn, "comments")?;
    let comment = CommentRecord {
        id,
        submission_id,
        author_id,
        action,
        message,
        created_at,
    };
    let mut table = txn.open_table(COMMENTS)?;
    let data = rmp_serde::to_vec_named(&comment)?;
    table.insert(id, data.as_slice())?;
    Ok(id)
}
