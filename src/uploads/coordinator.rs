use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{ChunkMetadata, ChunkStore, UploadError, UploadKey, UploadProgress, UploadState};
use crate::submissions::AssemblyError;

/// Turns a complete set of chunks into a finished record.
#[async_trait]
pub trait Assembler: Send + Sync {
    /// Returns the id of the submission the upload landed in.
    async fn assemble(
        &self,
        key: &UploadKey,
        metadata: &ChunkMetadata,
        chunks: &ChunkStore,
    ) -> Result<u64, AssemblyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The chunk is stored; the upload is not finished.
    Stored(UploadProgress),
    /// This call completed the upload and ran assembly.
    Completed {
        progress: UploadProgress,
        submission_id: u64,
    },
}

impl ChunkOutcome {
    pub fn progress(&self) -> &UploadProgress {
        match self {
            ChunkOutcome::Stored(progress) => progress,
            ChunkOutcome::Completed { progress, .. } => progress,
        }
    }
}

/// Totals every chunk of one upload must agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Declared {
    total_chunks: u64,
    total_size: u64,
    target: Option<u64>,
}

struct SlotState {
    declared: Option<Declared>,
    progress: UploadProgress,
}

/// Per-upload exclusion handle.
///
/// `gate` covers store, recount and the Open -> Complete transition.
/// `state` is only ever held briefly so progress reads never wait on
/// a chunk write or on assembly.
struct UploadSlot {
    gate: tokio::sync::Mutex<()>,
    state: RwLock<SlotState>,
}

impl UploadSlot {
    fn new(identifier: &str) -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            state: RwLock::new(SlotState {
                declared: None,
                progress: UploadProgress {
                    identifier: identifier.to_string(),
                    received: 0,
                    total: 0,
                    state: UploadState::Open,
                    failure_reason: None,
                    submission_id: None,
                },
            }),
        }
    }

    fn snapshot(&self) -> UploadProgress {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .progress
            .clone()
    }

    fn declared(&self) -> Option<Declared> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .declared
    }

    fn update<R>(&self, f: impl FnOnce(&mut SlotState) -> R) -> R {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

/// Coordinates chunk arrival and exactly-once assembly.
///
/// Live uploads hold a slot in `slots`. Once assembly succeeds or fails the
/// slot is retired: its final snapshot moves to `finished` and the next chunk
/// under the same identifier starts a fresh attempt.
pub struct UploadCoordinator {
    chunks: ChunkStore,
    assembler: Arc<dyn Assembler>,
    slots: Mutex<HashMap<UploadKey, Arc<UploadSlot>>>,
    finished: Mutex<HashMap<UploadKey, UploadProgress>>,
}

impl UploadCoordinator {
    pub fn new(chunks: ChunkStore, assembler: Arc<dyn Assembler>) -> Self {
        Self {
            chunks,
            assembler,
            slots: Mutex::new(HashMap::new()),
            finished: Mutex::new(HashMap::new()),
        }
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    /// Whether chunk `index` is already stored. Never creates upload state.
    pub fn probe_chunk(&self, key: &UploadKey, index: u64) -> Result<bool, UploadError> {
        match self.existing_slot(key) {
            // Assembly may be releasing the chunks right now
            Some(slot) if slot.snapshot().state == UploadState::Complete => return Ok(true),
            Some(_) => {}
            None => {
                // Leftovers of a failed attempt are discarded by the next one
                if self.finished_state(key) == Some(UploadState::Failed) {
                    return Ok(false);
                }
            }
        }
        Ok(self.chunks.contains(key, index)?)
    }

    /// Snapshot of an upload, `None` if no chunk has been received for it.
    ///
    /// After assembly this is the final snapshot until a new attempt starts.
    pub fn get_progress(&self, key: &UploadKey) -> Option<UploadProgress> {
        if let Some(slot) = self.existing_slot(key) {
            return Some(slot.snapshot());
        }
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Store one chunk and, if it completes the set, assemble the upload.
    pub async fn receive_chunk(
        &self,
        key: &UploadKey,
        metadata: &ChunkMetadata,
        payload: &[u8],
    ) -> Result<ChunkOutcome, UploadError> {
        metadata.validate(payload.len())?;

        let declared = Declared {
            total_chunks: metadata.total_chunks,
            total_size: metadata.total_size,
            target: metadata.target,
        };

        let (slot, progress) = loop {
            let slot = self.slot(key);
            let progress = {
                let _gate = slot.gate.lock().await;

                let current = slot.snapshot();
                match current.state {
                    UploadState::Open => {}
                    // Retired while we waited on the gate
                    state if state.is_terminal() => continue,
                    _ => {
                        debug!(upload_id = %key, chunk = metadata.index, "chunk resent during assembly");
                        return Ok(ChunkOutcome::Stored(current));
                    }
                }

                match slot.declared() {
                    Some(existing) if existing != declared => {
                        return Err(UploadError::TotalsMismatch(format!(
                            "expected {} chunks / {} bytes, got {} chunks / {} bytes",
                            existing.total_chunks,
                            existing.total_size,
                            declared.total_chunks,
                            declared.total_size
                        )));
                    }
                    Some(_) => {}
                    None => self.begin_attempt(key)?,
                }

                self.chunks.put(key, metadata.index, payload)?;
                let received = self.chunks.received(key, metadata.total_chunks)?;

                slot.update(|s| {
                    s.declared = Some(declared);
                    s.progress.received = received;
                    s.progress.total = metadata.total_chunks;
                    if received == metadata.total_chunks {
                        s.progress.state = UploadState::Complete;
                    }
                    s.progress.clone()
                })
            };
            break (slot, progress);
        };

        debug!(
            upload_id = %key,
            chunk = metadata.index,
            received = progress.received,
            total = progress.total,
            "chunk stored"
        );

        if progress.state != UploadState::Complete {
            return Ok(ChunkOutcome::Stored(progress));
        }

        // Only the caller that made the transition gets here
        info!(upload_id = %key, total = progress.total, "all chunks received, assembling");
        match self.assembler.assemble(key, metadata, &self.chunks).await {
            Ok(submission_id) => {
                match self.chunks.clear(key) {
                    Ok(removed) => debug!(upload_id = %key, removed, "chunks released"),
                    Err(e) => warn!(upload_id = %key, error = %e, "failed to release chunks"),
                }
                let progress = self.retire(key, &slot, |s| {
                    s.progress.state = UploadState::Processed;
                    s.progress.submission_id = Some(submission_id);
                });
                info!(upload_id = %key, submission_id, "upload processed");
                Ok(ChunkOutcome::Completed {
                    progress,
                    submission_id,
                })
            }
            Err(e) => {
                error!(upload_id = %key, error = %e, "assembly failed");
                self.retire(key, &slot, |s| {
                    s.progress.state = UploadState::Failed;
                    s.progress.failure_reason = Some(e.to_string());
                });
                Err(UploadError::Assembly(e))
            }
        }
    }

    /// Number of uploads with in-memory state.
    pub fn tracked_uploads(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Forget every upload. Stored chunks are untouched.
    pub fn reset(&self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// First chunk of an attempt: drop the previous attempt's final snapshot
    /// and any chunks it left behind.
    fn begin_attempt(&self, key: &UploadKey) -> Result<(), UploadError> {
        let previous = self
            .finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);

        if let Some(previous) = previous {
            if previous.state == UploadState::Failed {
                let removed = self.chunks.clear(key)?;
                debug!(upload_id = %key, removed, "discarded chunks of failed attempt");
            }
        }
        Ok(())
    }

    /// Apply the terminal transition and move the slot out of the arena.
    /// Both happen under the arena lock so no caller can pick up a retired slot.
    fn retire(
        &self,
        key: &UploadKey,
        slot: &Arc<UploadSlot>,
        finish: impl FnOnce(&mut SlotState),
    ) -> UploadProgress {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let progress = slot.update(|s| {
            finish(s);
            s.progress.clone()
        });
        if slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(key);
        }
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), progress.clone());
        progress
    }

    fn finished_state(&self, key: &UploadKey) -> Option<UploadState> {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|progress| progress.state)
    }

    fn existing_slot(&self, key: &UploadKey) -> Option<Arc<UploadSlot>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn slot(&self, key: &UploadKey) -> Arc<UploadSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(UploadSlot::new(&key.identifier))),
        )
    }
}
