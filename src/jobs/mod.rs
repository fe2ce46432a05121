//! Single-flight background jobs.
//!
//! Each job kind has one exclusion token in the [`JobRegistry`]. A trigger
//! either takes the token and starts the job detached, or is turned away.

mod indexer;
mod tasks;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::object_store::ObjectStoreError;
use crate::storage::DatabaseError;

pub use indexer::{ArchiveIndexer, HttpArchiveIndexer};
pub use tasks::{ingest_archives, index_archives, recompute_submission_cache, JobSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    RecomputeSubmissionCache,
    IngestArchives,
    IndexArchives,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        JobKind::RecomputeSubmissionCache,
        JobKind::IngestArchives,
        JobKind::IndexArchives,
    ];

    pub fn name(self) -> &'static str {
        match self {
            JobKind::RecomputeSubmissionCache => "recompute-submission-cache",
            JobKind::IngestArchives => "ingest-archives",
            JobKind::IndexArchives => "index-archives",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == value)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} is already running")]
    AlreadyRunning(JobKind),
    #[error("unknown job '{0}'")]
    UnknownKind(String),
    #[error("job {0} is not configured: {1}")]
    NotConfigured(JobKind, String),
    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
    #[error("artifact store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive indexer error: {0}")]
    Indexer(String),
}

/// Named exclusion tokens, one per job kind.
#[derive(Default)]
pub struct JobRegistry {
    flags: [AtomicBool; JobKind::ALL.len()],
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn flag(&self, kind: JobKind) -> &AtomicBool {
        &self.flags[kind as usize]
    }

    /// Take the token for `kind` without waiting. `None` if it is held.
    pub fn try_acquire(self: &Arc<Self>, kind: JobKind) -> Option<JobPermit> {
        self.flag(kind)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| JobPermit {
                registry: Arc::clone(self),
                kind,
            })
    }

    /// Return the token for `kind`. Normally done by dropping the permit.
    pub fn release(&self, kind: JobKind) {
        self.flag(kind).store(false, Ordering::Release);
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.flag(kind).load(Ordering::Acquire)
    }

    pub fn status(&self) -> Vec<(JobKind, bool)> {
        JobKind::ALL
            .into_iter()
            .map(|kind| (kind, self.is_running(kind)))
            .collect()
    }

    /// Release every token.
    pub fn reset(&self) {
        for flag in &self.flags {
            flag.store(false, Ordering::Release);
        }
    }

    /// Start `job` detached if no job of the same kind is running.
    ///
    /// The permit moves into the task, so the token is released when the job
    /// returns, fails or panics.
    pub fn spawn<F>(self: &Arc<Self>, kind: JobKind, job: F) -> Result<(), JobError>
    where
        F: Future<Output = Result<JobSummary, JobError>> + Send + 'static,
    {
        let permit = self
            .try_acquire(kind)
            .ok_or(JobError::AlreadyRunning(kind))?;

        tracing::info!(job = %kind, "job started");
        tokio::spawn(async move {
            let _permit = permit;
            match job.await {
                Ok(summary) => tracing::info!(
                    job = %kind,
                    processed = summary.processed,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "job finished"
                ),
                Err(e) => tracing::error!(job = %kind, error = %e, "job failed"),
            }
        });
        Ok(())
    }
}

/// Proof of holding a job token. Dropping it releases the token.
#[must_use = "the job token is released as soon as the permit is dropped"]
pub struct JobPermit {
    registry: Arc<JobRegistry>,
    kind: JobKind,
}

impl JobPermit {
    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

impl Drop for JobPermit {
    fn drop(&mut self) {
        self.registry.release(self.kind);
        tracing::debug!(job = %self.kind, "job token released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in JobKind::ALL {
            assert_eq!(JobKind::parse(kind.name()), Some(kind));
        }
        assert_eq!(JobKind::parse("defragment"), None);
    }

    #[test]
    fn permit_drop_releases() {
        let registry = JobRegistry::new();
        let permit = registry.try_acquire(JobKind::IngestArchives);
        assert!(permit.is_some());
        assert!(registry.try_acquire(JobKind::IngestArchives).is_none());
        // Other kinds are independent
        assert!(registry.try_acquire(JobKind::IndexArchives).is_some());

        drop(permit);
        assert!(!registry.is_running(JobKind::IngestArchives));
        assert!(registry.try_acquire(JobKind::IngestArchives).is_some());
    }

    #[test]
    fn reset_clears_every_token() {
        let registry = JobRegistry::new();
        let held = registry.try_acquire(JobKind::RecomputeSubmissionCache);
        registry.reset();
        assert!(!registry.is_running(JobKind::RecomputeSubmissionCache));
        drop(held);
    }
}
