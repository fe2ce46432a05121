use chrono::Utc;
use redb::ReadableTable;

use super::db::{next_id, Database, DatabaseError};
use super::models::{ArchiveEntry, ArchiveRecord};
use super::tables::*;

impl Database {
    // ========================================================================
    // Archive operations
    // ========================================================================

    /// Register an ingested archive; a checksum seen before is a conflict
    pub fn create_archive(
        &self,
        original_filename: &str,
        artifact_key: &str,
        byte_size: u64,
        sha256: &str,
    ) -> Result<ArchiveRecord, DatabaseError> {
        let write_txn = self.begin_write()?;

        {
            let table = write_txn.open_table(ARCHIVES)?;
            for result in table.iter()? {
                let (_, value) = result?;
                let archive: ArchiveRecord = rmp_serde::from_slice(value.value())?;
                if archive.sha256 == sha256 {
                    return Err(DatabaseError::Conflict(format!(
                        "archive '{original_filename}' already ingested as archive {}",
                        archive.id
                    )));
                }
            }
        }

        let archive = ArchiveRecord {
            id: next_id(&write_txn, "archives")?,
            original_filename: original_filename.to_string(),
            artifact_key: artifact_key.to_string(),
            byte_size,
            sha256: sha256.to_string(),
            ingested_at: Utc::now(),
            indexed: false,
        };
        {
            let mut table = write_txn.open_table(ARCHIVES)?;
            let data = rmp_serde::to_vec_named(&archive)?;
            table.insert(archive.id, data.as_slice())?;
        }

        write_txn.commit()?;
        Ok(archive)
    }

    /// Get all archives
    pub fn get_all_archives(&self) -> Result<Vec<ArchiveRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ARCHIVES)?;

        let mut archives = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            archives.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(archives)
    }

    /// Store the file listing of an archive and mark it indexed
    pub fn store_archive_contents(
        &self,
        archive_id: u64,
        entries: &[ArchiveEntry],
    ) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing: Option<ArchiveRecord> = {
            let table = write_txn.open_table(ARCHIVES)?;
            let result = match table.get(archive_id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            result
        };

        let updated = match existing {
            Some(mut archive) => {
                let mut contents = write_txn.open_table(ARCHIVE_CONTENTS)?;
                let data = rmp_serde::to_vec_named(entries)?;
                contents.insert(archive_id, data.as_slice())?;

                archive.indexed = true;
                let mut table = write_txn.open_table(ARCHIVES)?;
                let data = rmp_serde::to_vec_named(&archive)?;
                table.insert(archive_id, data.as_slice())?;
                true
            }
            None => false,
        };

        write_txn.commit()?;
        Ok(updated)
    }

    /// Get the indexed file listing of an archive
    pub fn get_archive_contents(&self, archive_id: u64) -> Result<Vec<ArchiveEntry>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ARCHIVE_CONTENTS)?;

        match table.get(archive_id)? {
            Some(data) => Ok(rmp_serde::from_slice(data.value())?),
            None => Ok(Vec::new()),
        }
    }
}
