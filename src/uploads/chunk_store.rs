use crate::storage::{Database, DatabaseError};
use crate::submissions::AssemblyError;

use super::UploadKey;

/// Durable chunk storage keyed by (upload, index).
///
/// Writers touching disjoint indices need no coordination; overwriting an
/// index replaces its payload.
#[derive(Clone)]
pub struct ChunkStore {
    db: Database,
}

impl ChunkStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn put(&self, key: &UploadKey, index: u64, payload: &[u8]) -> Result<(), DatabaseError> {
        self.db.put_chunk(&key.storage_key(), index, payload)
    }

    pub fn contains(&self, key: &UploadKey, index: u64) -> Result<bool, DatabaseError> {
        self.db.has_chunk(&key.storage_key(), index)
    }

    /// Distinct stored indices below `total_chunks`.
    pub fn received(&self, key: &UploadKey, total_chunks: u64) -> Result<u64, DatabaseError> {
        let indices = self.db.chunk_indices(&key.storage_key())?;
        Ok(indices.into_iter().filter(|i| *i < total_chunks).count() as u64)
    }

    pub fn stored_bytes(&self, key: &UploadKey) -> Result<u64, DatabaseError> {
        self.db.stored_bytes(&key.storage_key())
    }

    /// Concatenate chunks `0..total_chunks` in index order.
    pub fn concat(&self, key: &UploadKey, total_chunks: u64) -> Result<Vec<u8>, AssemblyError> {
        let storage_key = key.storage_key();
        let mut assembled = Vec::new();
        for index in 0..total_chunks {
            let payload = self
                .db
                .get_chunk(&storage_key, index)?
                .ok_or(AssemblyError::MissingChunk(index))?;
            assembled.extend_from_slice(&payload);
        }
        Ok(assembled)
    }

    pub fn clear(&self, key: &UploadKey) -> Result<u64, DatabaseError> {
        self.db.delete_chunks(&key.storage_key())
    }
}
