use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use curation_portal::auth::UserId;
use curation_portal::object_store::LocalStore;
use curation_portal::storage::models::Action;
use curation_portal::storage::Database;
use curation_portal::submissions::{
    AssemblyError, Notification, Notifier, SubmissionAssembler, ValidationReport, Validator,
    ValidatorError,
};
use curation_portal::uploads::{
    Assembler, ChunkMetadata, ChunkOutcome, ChunkStore, UploadCoordinator, UploadError, UploadKey,
    UploadState,
};

// ============================================================================
// Helpers
// ============================================================================

/// Counts calls and records what it assembled.
#[derive(Default)]
struct CountingAssembler {
    calls: AtomicUsize,
    assembled: Mutex<Vec<Vec<u8>>>,
    fail: AtomicBool,
}

#[async_trait]
impl Assembler for CountingAssembler {
    async fn assemble(
        &self,
        key: &UploadKey,
        metadata: &ChunkMetadata,
        chunks: &ChunkStore,
    ) -> Result<u64, AssemblyError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
        let data = chunks.concat(key, metadata.total_chunks)?;
        if self.fail.load(Ordering::SeqCst) {
            return Err(AssemblyError::TargetNotFound("submission 99".to_string()));
        }
        self.assembled.lock().unwrap().push(data);
        Ok(100 + call)
    }
}

fn coordinator(
    dir: &tempfile::TempDir,
    assembler: Arc<CountingAssembler>,
) -> (UploadCoordinator, Database) {
    let db = Database::open(dir.path().join("data")).unwrap();
    let coordinator = UploadCoordinator::new(ChunkStore::new(db.clone()), assembler);
    (coordinator, db)
}

fn metadata(index: u64, sizes: &[u64]) -> ChunkMetadata {
    ChunkMetadata {
        index,
        total_chunks: sizes.len() as u64,
        total_size: sizes.iter().sum(),
        chunk_size: sizes[index as usize],
        filename: "curation.zip".to_string(),
        target: None,
    }
}

fn payload(index: u64, size: u64) -> Vec<u8> {
    vec![b'a' + index as u8; size as usize]
}

// ============================================================================
// Coordinator
// ============================================================================

#[tokio::test]
async fn test_chunks_in_order_assemble_once() {
    let dir = tempfile::tempdir().unwrap();
    let assembler = Arc::new(CountingAssembler::default());
    let (coordinator, _db) = coordinator(&dir, Arc::clone(&assembler));
    let key = UploadKey::new(UserId(7), "upload-1").unwrap();
    let sizes = [10, 10, 5];

    for index in 0..2 {
        let outcome = coordinator
            .receive_chunk(&key, &metadata(index, &sizes), &payload(index, sizes[index as usize]))
            .await
            .unwrap();
        assert!(matches!(outcome, ChunkOutcome::Stored(_)));
        assert_eq!(outcome.progress().received, index + 1);
    }

    let outcome = coordinator
        .receive_chunk(&key, &metadata(2, &sizes), &payload(2, 5))
        .await
        .unwrap();
    match outcome {
        ChunkOutcome::Completed {
            progress,
            submission_id,
        } => {
            assert_eq!(submission_id, 100);
            assert_eq!(progress.state, UploadState::Processed);
            assert_eq!(progress.received, 3);
        }
        other => panic!("expected completion, got {other:?}"),
    }

    assert_eq!(assembler.calls.load(Ordering::SeqCst), 1);
    let assembled = assembler.assembled.lock().unwrap()[0].clone();
    let mut expected = payload(0, 10);
    expected.extend(payload(1, 10));
    expected.extend(payload(2, 5));
    assert_eq!(assembled, expected);

    // Chunks are released once processed
    assert_eq!(coordinator.chunks().stored_bytes(&key).unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_chunks_assemble_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let assembler = Arc::new(CountingAssembler::default());
    let (coordinator, _db) = coordinator(&dir, Arc::clone(&assembler));
    let coordinator = Arc::new(coordinator);
    let key = UploadKey::new(UserId(7), "racy-upload").unwrap();
    let sizes = [10u64, 10, 5];

    let mut handles = Vec::new();
    for index in [2u64, 0, 1] {
        let coordinator = Arc::clone(&coordinator);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .receive_chunk(&key, &metadata(index, &sizes), &payload(index, sizes[index as usize]))
                .await
        }));
    }

    let mut completions = 0;
    for handle in handles {
        if let ChunkOutcome::Completed { .. } = handle.await.unwrap().unwrap() {
            completions += 1;
        }
    }

    assert_eq!(completions, 1);
    assert_eq!(assembler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(assembler.assembled.lock().unwrap()[0].len(), 25);
    assert_eq!(
        coordinator.get_progress(&key).unwrap().state,
        UploadState::Processed
    );
}

#[tokio::test]
async fn test_resent_chunk_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let assembler = Arc::new(CountingAssembler::default());
    let (coordinator, _db) = coordinator(&dir, Arc::clone(&assembler));
    let key = UploadKey::new(UserId(7), "resend").unwrap();
    let sizes = [4, 4];

    for _ in 0..3 {
        let outcome = coordinator
            .receive_chunk(&key, &metadata(0, &sizes), &payload(0, 4))
            .await
            .unwrap();
        assert_eq!(outcome.progress().received, 1);
    }
    assert_eq!(coordinator.chunks().stored_bytes(&key).unwrap(), 4);

    coordinator
        .receive_chunk(&key, &metadata(1, &sizes), &payload(1, 4))
        .await
        .unwrap();

    // A resend after completion opens a new attempt instead of reassembling
    let outcome = coordinator
        .receive_chunk(&key, &metadata(1, &sizes), &payload(1, 4))
        .await
        .unwrap();
    assert!(matches!(outcome, ChunkOutcome::Stored(ref p) if p.state == UploadState::Open));
    assert_eq!(outcome.progress().received, 1);
    assert_eq!(assembler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_size_mismatch_stores_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _db) = coordinator(&dir, Arc::new(CountingAssembler::default()));
    let key = UploadKey::new(UserId(7), "short").unwrap();

    let result = coordinator
        .receive_chunk(&key, &metadata(0, &[10, 10]), &payload(0, 9))
        .await;

    assert!(matches!(result, Err(UploadError::SizeMismatch { declared: 10, actual: 9, .. })));
    assert!(!coordinator.probe_chunk(&key, 0).unwrap());
}

#[tokio::test]
async fn test_changed_totals_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _db) = coordinator(&dir, Arc::new(CountingAssembler::default()));
    let key = UploadKey::new(UserId(7), "shifty").unwrap();

    coordinator
        .receive_chunk(&key, &metadata(0, &[10, 10, 10]), &payload(0, 10))
        .await
        .unwrap();

    let result = coordinator
        .receive_chunk(&key, &metadata(1, &[10, 10]), &payload(1, 10))
        .await;
    assert!(matches!(result, Err(UploadError::TotalsMismatch(_))));
    assert!(!coordinator.probe_chunk(&key, 1).unwrap());
}

#[tokio::test]
async fn test_probe_does_not_create_state() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _db) = coordinator(&dir, Arc::new(CountingAssembler::default()));
    let key = UploadKey::new(UserId(7), "never-sent").unwrap();

    assert!(!coordinator.probe_chunk(&key, 0).unwrap());
    assert!(coordinator.get_progress(&key).is_none());
    assert_eq!(coordinator.tracked_uploads(), 0);
}

#[tokio::test]
async fn test_uploads_are_scoped_per_owner() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _db) = coordinator(&dir, Arc::new(CountingAssembler::default()));
    let alice = UploadKey::new(UserId(1), "same-token").unwrap();
    let bob = UploadKey::new(UserId(2), "same-token").unwrap();

    coordinator
        .receive_chunk(&alice, &metadata(0, &[3, 3]), &payload(0, 3))
        .await
        .unwrap();

    assert!(coordinator.probe_chunk(&alice, 0).unwrap());
    assert!(!coordinator.probe_chunk(&bob, 0).unwrap());
    assert!(coordinator.get_progress(&bob).is_none());
}

#[tokio::test]
async fn test_failed_assembly_keeps_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let assembler = Arc::new(CountingAssembler {
        fail: AtomicBool::new(true),
        ..Default::default()
    });
    let (coordinator, _db) = coordinator(&dir, Arc::clone(&assembler));
    let key = UploadKey::new(UserId(7), "doomed").unwrap();
    let sizes = [3, 3];

    coordinator
        .receive_chunk(&key, &metadata(0, &sizes), &payload(0, 3))
        .await
        .unwrap();
    let result = coordinator
        .receive_chunk(&key, &metadata(1, &sizes), &payload(1, 3))
        .await;
    assert!(matches!(result, Err(UploadError::Assembly(_))));

    let progress = coordinator.get_progress(&key).unwrap();
    assert_eq!(progress.state, UploadState::Failed);
    assert!(progress.failure_reason.is_some());
    assert_eq!(coordinator.chunks().stored_bytes(&key).unwrap(), 6);

    assert_eq!(assembler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.tracked_uploads(), 0);
}

#[tokio::test]
async fn test_identifier_reusable_after_processed() {
    let dir = tempfile::tempdir().unwrap();
    let assembler = Arc::new(CountingAssembler::default());
    let (coordinator, _db) = coordinator(&dir, Arc::clone(&assembler));
    // resumable.js derives identifiers from size and filename
    let key = UploadKey::new(UserId(7), "25-curationzip").unwrap();
    let sizes = [10, 10, 5];

    for index in 0..3 {
        coordinator
            .receive_chunk(&key, &metadata(index, &sizes), &payload(index, sizes[index as usize]))
            .await
            .unwrap();
    }
    assert_eq!(
        coordinator.get_progress(&key).unwrap().state,
        UploadState::Processed
    );
    assert_eq!(coordinator.tracked_uploads(), 0);

    // An edited package of the same size reuses the identifier
    let edited = |index: u64| vec![b'x' + index as u8; sizes[index as usize] as usize];
    let mut completed = 0;
    for index in 0..3 {
        assert!(!coordinator.probe_chunk(&key, index).unwrap());
        let outcome = coordinator
            .receive_chunk(&key, &metadata(index, &sizes), &edited(index))
            .await
            .unwrap();
        if let ChunkOutcome::Completed { submission_id, .. } = outcome {
            assert_eq!(submission_id, 101);
            completed += 1;
        } else {
            assert!(coordinator.probe_chunk(&key, index).unwrap());
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(assembler.calls.load(Ordering::SeqCst), 2);
    let mut expected = edited(0);
    expected.extend(edited(1));
    expected.extend(edited(2));
    assert_eq!(assembler.assembled.lock().unwrap()[1], expected);
}

#[tokio::test]
async fn test_retry_after_failed_assembly() {
    let dir = tempfile::tempdir().unwrap();
    let assembler = Arc::new(CountingAssembler {
        fail: AtomicBool::new(true),
        ..Default::default()
    });
    let (coordinator, _db) = coordinator(&dir, Arc::clone(&assembler));
    let key = UploadKey::new(UserId(7), "flaky-validator").unwrap();
    let sizes = [3, 3];

    coordinator
        .receive_chunk(&key, &metadata(0, &sizes), &payload(0, 3))
        .await
        .unwrap();
    let result = coordinator
        .receive_chunk(&key, &metadata(1, &sizes), &payload(1, 3))
        .await;
    assert!(matches!(
        result,
        Err(UploadError::Assembly(AssemblyError::TargetNotFound(_)))
    ));

    // The client starts over once the outage is resolved
    assembler.fail.store(false, Ordering::SeqCst);
    assert!(!coordinator.probe_chunk(&key, 0).unwrap());

    let first = coordinator
        .receive_chunk(&key, &metadata(1, &sizes), &payload(1, 3))
        .await
        .unwrap();
    assert!(matches!(first, ChunkOutcome::Stored(ref p) if p.state == UploadState::Open));
    assert_eq!(first.progress().received, 1);
    assert!(!coordinator.probe_chunk(&key, 0).unwrap());

    let outcome = coordinator
        .receive_chunk(&key, &metadata(0, &sizes), &payload(0, 3))
        .await
        .unwrap();
    assert!(matches!(outcome, ChunkOutcome::Completed { .. }));
    assert_eq!(assembler.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        coordinator.get_progress(&key).unwrap().state,
        UploadState::Processed
    );
}

// ============================================================================
// Full pipeline
// ============================================================================

struct FixedValidator(ValidationReport);

#[async_trait]
impl Validator for FixedValidator {
    async fn validate(
        &self,
        _filename: &str,
        _artifact: Bytes,
    ) -> Result<ValidationReport, ValidatorError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<Notification>>);

impl Notifier for Recorder {
    fn notify(&self, event: Notification) {
        self.0.lock().unwrap().push(event);
    }
}

fn pipeline(
    dir: &tempfile::TempDir,
    report: ValidationReport,
) -> (UploadCoordinator, Database, Arc<Recorder>) {
    let db = Database::open(dir.path().join("data")).unwrap();
    let store = Arc::new(LocalStore::new(dir.path().join("artifacts")).unwrap());
    let recorder = Arc::new(Recorder::default());
    let assembler = SubmissionAssembler::new(
        db.clone(),
        store,
        Arc::new(db.clone()),
        Arc::new(FixedValidator(report)),
        recorder.clone(),
    );
    let coordinator = UploadCoordinator::new(ChunkStore::new(db.clone()), Arc::new(assembler));
    (coordinator, db, recorder)
}

async fn upload(
    coordinator: &UploadCoordinator,
    key: &UploadKey,
    body: &[u8],
) -> Result<ChunkOutcome, UploadError> {
    let meta = ChunkMetadata {
        index: 0,
        total_chunks: 1,
        total_size: body.len() as u64,
        chunk_size: body.len() as u64,
        filename: "My Curation.7z".to_string(),
        target: None,
    };
    coordinator.receive_chunk(key, &meta, body).await
}

#[tokio::test]
async fn test_pipeline_commits_submission_with_validator_comment() {
    let dir = tempfile::tempdir().unwrap();
    let report = ValidationReport {
        curation_warnings: vec!["missing logo".to_string()],
        ..Default::default()
    };
    let (coordinator, db, recorder) = pipeline(&dir, report);
    let key = UploadKey::new(UserId(12), "pipeline").unwrap();

    let submission_id = match upload(&coordinator, &key, b"7z archive bytes").await.unwrap() {
        ChunkOutcome::Completed { submission_id, .. } => submission_id,
        other => panic!("expected completion, got {other:?}"),
    };

    let submission = db.get_submission(submission_id).unwrap().unwrap();
    assert_eq!(submission.submitter_id, 12);

    let files = db.get_submission_files(submission_id).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].byte_size, 16);
    assert!(files[0].artifact_key.ends_with(".7z"));
    assert_eq!(
        files[0].sha256,
        "e410c54a0f62028ce98a403c752e8d0fb2d5f85df02374c22feb3c07ceeb04f4"
    );
    assert!(dir.path().join("artifacts").join(&files[0].artifact_key).exists());

    let comments = db.get_comments(submission_id).unwrap();
    let verdict = comments.last().unwrap();
    assert_eq!(verdict.action, Action::RequestChanges);
    assert!(verdict.message.as_deref().unwrap().contains("missing logo"));

    let events = recorder.0.lock().unwrap();
    assert!(matches!(
        events.as_slice(),
        [Notification::SubmissionUploaded { created: true, .. }]
    ));
}

#[tokio::test]
async fn test_pipeline_rejects_duplicate_content() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, db, _) = pipeline(&dir, ValidationReport::default());

    let first = UploadKey::new(UserId(12), "first").unwrap();
    upload(&coordinator, &first, b"same bytes").await.unwrap();

    let second = UploadKey::new(UserId(13), "second").unwrap();
    let result = upload(&coordinator, &second, b"same bytes").await;
    assert!(matches!(
        result,
        Err(UploadError::Assembly(AssemblyError::Duplicate(_)))
    ));
    assert_eq!(db.get_all_submissions().unwrap().len(), 1);
    assert_eq!(coordinator.chunks().stored_bytes(&second).unwrap(), 10);
}
