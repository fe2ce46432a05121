//! Resumable chunked uploads.
//!
//! A client splits a file into numbered chunks and sends them in any order,
//! possibly in parallel. Chunks are durable as soon as they are stored; the
//! request that completes the set runs assembly exactly once.

mod chunk_store;
mod coordinator;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::auth::UserId;
use crate::storage::DatabaseError;
use crate::submissions::AssemblyError;

pub use chunk_store::ChunkStore;
pub use coordinator::{Assembler, ChunkOutcome, UploadCoordinator};

pub const MAX_IDENTIFIER_LEN: usize = 256;

/// File extensions accepted for curation packages.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["zip", "7z"];

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),
    #[error("chunk {index} declared {declared} bytes but carried {actual}")]
    SizeMismatch {
        index: u64,
        declared: u64,
        actual: u64,
    },
    #[error("chunk disagrees with the upload: {0}")]
    TotalsMismatch(String),
    #[error("unsupported file type '{0}', expected .zip or .7z")]
    UnsupportedFileType(String),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error("chunk storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// One logical upload: a client token scoped to the uploading user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadKey {
    pub owner: UserId,
    pub identifier: String,
}

impl UploadKey {
    pub fn new(owner: UserId, identifier: &str) -> Result<Self, UploadError> {
        let valid = !identifier.is_empty()
            && identifier.len() <= MAX_IDENTIFIER_LEN
            && identifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(UploadError::InvalidIdentifier(identifier.to_string()));
        }

        Ok(Self {
            owner,
            identifier: identifier.to_string(),
        })
    }

    /// Key under which the upload's chunks are stored.
    pub fn storage_key(&self) -> String {
        format!("{}/{}", self.owner, self.identifier)
    }
}

impl fmt::Display for UploadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.identifier)
    }
}

/// What a client declares alongside each chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMetadata {
    /// Zero-based chunk index.
    pub index: u64,
    pub total_chunks: u64,
    pub total_size: u64,
    /// Size of this chunk's payload.
    pub chunk_size: u64,
    pub filename: String,
    /// Existing submission to append to.
    pub target: Option<u64>,
}

impl ChunkMetadata {
    /// Check the declaration against itself and the payload it came with.
    pub fn validate(&self, payload_len: usize) -> Result<(), UploadError> {
        if self.total_chunks == 0 {
            return Err(UploadError::InvalidChunk(
                "total chunks must be at least 1".to_string(),
            ));
        }
        if self.index >= self.total_chunks {
            return Err(UploadError::InvalidChunk(format!(
                "chunk index {} out of range for {} chunks",
                self.index, self.total_chunks
            )));
        }
        if self.chunk_size > self.total_size {
            return Err(UploadError::InvalidChunk(format!(
                "chunk size {} exceeds total size {}",
                self.chunk_size, self.total_size
            )));
        }

        let extension = self
            .filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());
        if !extension.is_some_and(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str())) {
            return Err(UploadError::UnsupportedFileType(self.filename.clone()));
        }

        if payload_len as u64 != self.chunk_size {
            return Err(UploadError::SizeMismatch {
                index: self.index,
                declared: self.chunk_size,
                actual: payload_len as u64,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Open,
    /// Every chunk is present and assembly is running.
    Complete,
    Processed,
    Failed,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Processed | UploadState::Failed)
    }
}

/// Point-in-time view of one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub identifier: String,
    pub received: u64,
    pub total: u64,
    pub state: UploadState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<u64>,
}
