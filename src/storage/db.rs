use redb::{
    Database as RedbDatabase, ReadTransaction, ReadableTable, ReadableTableMetadata, TableHandle,
    WriteTransaction,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::tables::*;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(Box<redb::CommitError>),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    Redb(Box<redb::Error>),
    #[error("Database error: {0}")]
    RedbDatabase(Box<redb::DatabaseError>),
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),
    #[error("Storage error: {0}")]
    Storage(Box<redb::StorageError>),
    #[error("Table error: {0}")]
    Table(Box<redb::TableError>),
    #[error("Transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
}

impl From<redb::CommitError> for DatabaseError {
    fn from(e: redb::CommitError) -> Self {
        DatabaseError::Commit(Box::new(e))
    }
}

impl From<redb::DatabaseError> for DatabaseError {
    fn from(e: redb::DatabaseError) -> Self {
        DatabaseError::RedbDatabase(Box::new(e))
    }
}

impl From<redb::Error> for DatabaseError {
    fn from(e: redb::Error) -> Self {
        DatabaseError::Redb(Box::new(e))
    }
}

impl From<redb::StorageError> for DatabaseError {
    fn from(e: redb::StorageError) -> Self {
        DatabaseError::Storage(Box::new(e))
    }
}

impl From<redb::TableError> for DatabaseError {
    fn from(e: redb::TableError) -> Self {
        DatabaseError::Table(Box::new(e))
    }
}

impl From<redb::TransactionError> for DatabaseError {
    fn from(e: redb::TransactionError) -> Self {
        DatabaseError::Transaction(Box::new(e))
    }
}

pub struct Database {
    db: Arc<RedbDatabase>,
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
        }
    }
}

/// Statistics from a purge operation
#[derive(Debug, Default)]
pub struct PurgeStats {
    pub archives: u64,
    pub chunks: u64,
    pub sessions: u64,
    pub submissions: u64,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("curation-portal.redb");
        let db = Arc::new(RedbDatabase::create(db_path)?);

        // Initialize application tables
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(USER_ROLES)?;
            let _ = write_txn.open_table(SUBMISSIONS)?;
            let _ = write_txn.open_table(USER_SUBMISSIONS)?;
            let _ = write_txn.open_table(SUBMISSION_FILES)?;
            let _ = write_txn.open_table(FILE_CHECKSUMS)?;
            let _ = write_txn.open_table(COMMENTS)?;
            let _ = write_txn.open_table(CURATION_META)?;
            let _ = write_txn.open_table(SUBMISSION_CACHE)?;
            let _ = write_txn.open_table(ARCHIVES)?;
            let _ = write_txn.open_table(ARCHIVE_CONTENTS)?;
            let _ = write_txn.open_table(SEQUENCES)?;
            let _ = write_txn.open_table(UPLOAD_CHUNKS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    /// Purge all data - for testing only
    pub fn purge_all(&self) -> Result<PurgeStats, DatabaseError> {
        let write_txn = self.begin_write()?;
        let stats = PurgeStats {
            archives: write_txn.open_table(ARCHIVES)?.len()?,
            chunks: write_txn.open_table(UPLOAD_CHUNKS)?.len()?,
            sessions: write_txn.open_table(SESSIONS)?.len()?,
            submissions: write_txn.open_table(SUBMISSIONS)?.len()?,
        };

        reset_table(&write_txn, SESSIONS)?;
        reset_table(&write_txn, USER_ROLES)?;
        reset_table(&write_txn, SUBMISSIONS)?;
        reset_table(&write_txn, USER_SUBMISSIONS)?;
        reset_table(&write_txn, SUBMISSION_FILES)?;
        reset_table(&write_txn, FILE_CHECKSUMS)?;
        reset_table(&write_txn, COMMENTS)?;
        reset_table(&write_txn, CURATION_META)?;
        reset_table(&write_txn, SUBMISSION_CACHE)?;
        reset_table(&write_txn, ARCHIVES)?;
        reset_table(&write_txn, ARCHIVE_CONTENTS)?;
        reset_table(&write_txn, SEQUENCES)?;
        reset_table(&write_txn, UPLOAD_CHUNKS)?;

        write_txn.commit()?;
        Ok(stats)
    }
}

/// Drop and recreate a table inside an open write transaction.
fn reset_table<K: redb::Key + 'static, V: redb::Value + 'static>(
    txn: &WriteTransaction,
    table: redb::TableDefinition<K, V>,
) -> Result<(), DatabaseError> {
    txn.delete_table(table)?;
    let _ = txn.open_table(table)?;
    tracing::trace!(table = table.name(), "table reset");
    Ok(())
}

/// Issue the next id from a named sequence inside an open write transaction.
pub(crate) fn next_id(txn: &WriteTransaction, sequence: &str) -> Result<u64, DatabaseError> {
    let mut table = txn.open_table(SEQUENCES)?;
    let next = table.get(sequence)?.map(|v| v.value()).unwrap_or(0) + 1;
    table.insert(sequence, next)?;
    Ok(next)
}
