use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::tables::*;

impl Database {
    // ========================================================================
    // Upload chunk operations
    // ========================================================================

    /// Store a chunk, overwriting any previous payload at the same index
    pub fn put_chunk(&self, upload_key: &str, index: u64, payload: &[u8]) -> Result<(), DatabaseError> {
        debug_assert!(!upload_key.is_empty(), "upload key must not be empty");

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(UPLOAD_CHUNKS)?;
            table.insert((upload_key, index), payload)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Check whether a chunk has been stored
    pub fn has_chunk(&self, upload_key: &str, index: u64) -> Result<bool, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(UPLOAD_CHUNKS)?;
        Ok(table.get((upload_key, index))?.is_some())
    }

    /// Get one chunk payload
    pub fn get_chunk(&self, upload_key: &str, index: u64) -> Result<Option<Vec<u8>>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(UPLOAD_CHUNKS)?;
        Ok(table.get((upload_key, index))?.map(|v| v.value().to_vec()))
    }

    /// Indices of every chunk stored for an upload, ascending
    pub fn chunk_indices(&self, upload_key: &str) -> Result<Vec<u64>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(UPLOAD_CHUNKS)?;

        let mut indices = Vec::new();
        for result in table.range((upload_key, 0u64)..=(upload_key, u64::MAX))? {
            let (key, _) = result?;
            indices.push(key.value().1);
        }
        Ok(indices)
    }

    /// Total payload bytes stored for an upload
    pub fn stored_bytes(&self, upload_key: &str) -> Result<u64, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(UPLOAD_CHUNKS)?;

        let mut total = 0u64;
        for result in table.range((upload_key, 0u64)..=(upload_key, u64::MAX))? {
            let (_, value) = result?;
            total += value.value().len() as u64;
        }
        Ok(total)
    }

    /// Delete every chunk of an upload, returning how many were removed
    pub fn delete_chunks(&self, upload_key: &str) -> Result<u64, DatabaseError> {
        let write_txn = self.begin_write()?;

        let indices: Vec<u64> = {
            let table = write_txn.open_table(UPLOAD_CHUNKS)?;
            let mut indices = Vec::new();
            for result in table.range((upload_key, 0u64)..=(upload_key, u64::MAX))? {
                let (key, _) = result?;
                indices.push(key.value().1);
            }
            indices
        };

        {
            let mut table = write_txn.open_table(UPLOAD_CHUNKS)?;
            for index in &indices {
                table.remove((upload_key, *index))?;
            }
        }

        write_txn.commit()?;
        Ok(indices.len() as u64)
    }
}
