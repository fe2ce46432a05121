use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use curation_portal::jobs::{JobError, JobKind, JobRegistry, JobSummary};
use tokio::sync::oneshot;

async fn wait_until_released(registry: &JobRegistry, kind: JobKind) {
    for _ in 0..200 {
        if !registry.is_running(kind) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{kind} was never released");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_has_one_winner() {
    let registry = JobRegistry::new();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            registry.try_acquire(JobKind::IngestArchives)
        }));
    }

    let mut permits = Vec::new();
    for handle in handles {
        if let Some(permit) = handle.await.unwrap() {
            permits.push(permit);
        }
    }

    assert_eq!(permits.len(), 1);
    assert!(registry.is_running(JobKind::IngestArchives));
    assert!(!registry.is_running(JobKind::IndexArchives));

    drop(permits);
    assert!(!registry.is_running(JobKind::IngestArchives));
}

#[tokio::test]
async fn test_kinds_are_independent() {
    let registry = JobRegistry::new();

    let _ingest = registry.try_acquire(JobKind::IngestArchives).unwrap();
    let index = registry.try_acquire(JobKind::IndexArchives);

    assert!(index.is_some());
    assert!(registry.try_acquire(JobKind::IngestArchives).is_none());
}

#[tokio::test]
async fn test_explicit_release_allows_reacquire() {
    let registry = JobRegistry::new();

    let permit = registry.try_acquire(JobKind::RecomputeSubmissionCache).unwrap();
    std::mem::forget(permit);
    assert!(registry.try_acquire(JobKind::RecomputeSubmissionCache).is_none());

    registry.release(JobKind::RecomputeSubmissionCache);
    assert!(registry.try_acquire(JobKind::RecomputeSubmissionCache).is_some());
}

#[tokio::test]
async fn test_spawned_job_holds_guard_until_finished() {
    let registry = JobRegistry::new();
    let (finish, finished) = oneshot::channel::<()>();
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&runs);
    registry
        .spawn(JobKind::IndexArchives, async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = finished.await;
            Ok(JobSummary::default())
        })
        .unwrap();

    let second = registry.spawn(JobKind::IndexArchives, async { Ok(JobSummary::default()) });
    assert!(matches!(
        second,
        Err(JobError::AlreadyRunning(JobKind::IndexArchives))
    ));

    finish.send(()).unwrap();
    wait_until_released(&registry, JobKind::IndexArchives).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_job_releases_guard() {
    let registry = JobRegistry::new();

    registry
        .spawn(JobKind::IngestArchives, async {
            Err(JobError::Indexer("indexer unreachable".to_string()))
        })
        .unwrap();

    wait_until_released(&registry, JobKind::IngestArchives).await;
    assert!(registry.try_acquire(JobKind::IngestArchives).is_some());
}

#[tokio::test]
async fn test_panicking_job_releases_guard() {
    let registry = JobRegistry::new();

    registry
        .spawn(JobKind::RecomputeSubmissionCache, async {
            let processed: Vec<u64> = Vec::new();
            Ok(JobSummary {
                processed: processed[0],
                ..Default::default()
            })
        })
        .unwrap();

    wait_until_released(&registry, JobKind::RecomputeSubmissionCache).await;
    assert!(registry
        .try_acquire(JobKind::RecomputeSubmissionCache)
        .is_some());
}
