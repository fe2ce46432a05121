mod local;

pub use local::LocalStore;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),
    #[error("Artifact not found: {0}")]
    NotFound(String),
}

/// Durable storage for assembled uploads and ingested archives.
///
/// Keys are relative, slash-separated paths such as `submissions/<uuid>.zip`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Persist `data` under `key` and return where it landed.
    async fn put(&self, key: &str, data: Bytes) -> Result<String, ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
}

/// Artifact key for a new object in `namespace`, keeping the original extension.
pub fn artifact_key(namespace: &str, original_filename: &str) -> String {
    let id = uuid::Uuid::new_v4();
    match original_filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => {
            format!("{namespace}/{id}.{}", ext.to_ascii_lowercase())
        }
        _ => format!("{namespace}/{id}"),
    }
}
