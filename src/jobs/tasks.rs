use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{ArchiveIndexer, JobError};
use crate::object_store::{artifact_key, ObjectStore};
use crate::storage::{Database, DatabaseError};
use crate::uploads::ACCEPTED_EXTENSIONS;

/// How many archives are ingested at once.
pub const INGEST_PARALLELISM: usize = 3;

/// Outcome counters reported when a job finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Rebuild the summary row of every submission.
pub async fn recompute_submission_cache(db: Database) -> Result<JobSummary, JobError> {
    let submissions = db.get_all_submissions()?;
    let mut summary = JobSummary::default();

    for submission in submissions {
        match db.recompute_submission_summary(submission.id) {
            Ok(Some(_)) => summary.processed += 1,
            Ok(None) => summary.skipped += 1,
            Err(e) => {
                warn!(job = "recompute-submission-cache", submission_id = submission.id, error = %e, "recompute failed");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

/// Move every `.zip`/`.7z` in `ingest_dir` into the artifact store and
/// register it as an archive. Archives whose checksum is already known are
/// skipped and left in place.
pub async fn ingest_archives(
    db: Database,
    store: Arc<dyn ObjectStore>,
    ingest_dir: PathBuf,
) -> Result<JobSummary, JobError> {
    let mut summary = JobSummary::default();
    let mut candidates = Vec::new();

    let mut entries = tokio::fs::read_dir(&ingest_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        if has_accepted_extension(&path) {
            candidates.push(path);
        } else {
            summary.skipped += 1;
        }
    }
    candidates.sort();
    debug!(job = "ingest-archives", directory = %ingest_dir.display(), candidates = candidates.len(), "listed ingest directory");

    let semaphore = Arc::new(Semaphore::new(INGEST_PARALLELISM));
    let mut tasks = JoinSet::new();
    for path in candidates {
        let semaphore = Arc::clone(&semaphore);
        let db = db.clone();
        let store = Arc::clone(&store);
        tasks.spawn(async move {
            let _slot = match semaphore.acquire_owned().await {
                Ok(slot) => slot,
                Err(e) => return Err(JobError::Io(std::io::Error::other(e))),
            };
            ingest_one(&db, store.as_ref(), &path).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(true)) => summary.processed += 1,
            Ok(Ok(false)) => summary.skipped += 1,
            Ok(Err(e)) => {
                warn!(job = "ingest-archives", error = %e, "archive ingestion failed");
                summary.failed += 1;
            }
            Err(e) => {
                warn!(job = "ingest-archives", error = %e, "archive ingestion task aborted");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

async fn ingest_one(db: &Database, store: &dyn ObjectStore, path: &Path) -> Result<bool, JobError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let data = tokio::fs::read(path).await?;
    let byte_size = data.len() as u64;
    let sha256 = hex::encode(ring::digest::digest(&ring::digest::SHA256, &data));

    let key = artifact_key("archives", &filename);
    store.put(&key, Bytes::from(data)).await?;

    match db.create_archive(&filename, &key, byte_size, &sha256) {
        Ok(archive) => {
            tokio::fs::remove_file(path).await?;
            info!(job = "ingest-archives", archive_id = archive.id, filename = %filename, byte_size, "archive ingested");
            Ok(true)
        }
        Err(DatabaseError::Conflict(reason)) => {
            store.delete(&key).await?;
            debug!(job = "ingest-archives", filename = %filename, %reason, "archive already ingested");
            Ok(false)
        }
        Err(e) => {
            if let Err(cleanup) = store.delete(&key).await {
                warn!(job = "ingest-archives", artifact = %key, error = %cleanup, "failed to discard artifact");
            }
            Err(e.into())
        }
    }
}

fn has_accepted_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ACCEPTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Send every unindexed archive to the indexer and store its file listing.
pub async fn index_archives(
    db: Database,
    store: Arc<dyn ObjectStore>,
    indexer: Arc<dyn ArchiveIndexer>,
) -> Result<JobSummary, JobError> {
    let mut summary = JobSummary::default();

    for archive in db.get_all_archives()? {
        if archive.indexed {
            summary.skipped += 1;
            continue;
        }

        let data = match store.get(&archive.artifact_key).await {
            Ok(data) => data,
            Err(e) => {
                warn!(job = "index-archives", archive_id = archive.id, error = %e, "archive artifact unreadable");
                summary.failed += 1;
                continue;
            }
        };

        match indexer.index(&archive.original_filename, data).await {
            Ok(entries) => {
                db.store_archive_contents(archive.id, &entries)?;
                debug!(job = "index-archives", archive_id = archive.id, files = entries.len(), "archive indexed");
                summary.processed += 1;
            }
            Err(e) => {
                warn!(job = "index-archives", archive_id = archive.id, error = %e, "indexing failed");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
