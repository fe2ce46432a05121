use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use super::JobError;
use crate::storage::models::ArchiveEntry;

/// Lists the files inside an archive.
#[async_trait]
pub trait ArchiveIndexer: Send + Sync {
    async fn index(&self, filename: &str, archive: Bytes) -> Result<Vec<ArchiveEntry>, JobError>;
}

#[derive(Deserialize)]
struct IndexerResponse {
    #[serde(default)]
    files: Vec<ArchiveEntry>,
}

/// Archive indexer service; archives are POSTed as multipart field `file`
/// to `{base}/upload`.
pub struct HttpArchiveIndexer {
    base_url: String,
    client: Client,
}

impl HttpArchiveIndexer {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl ArchiveIndexer for HttpArchiveIndexer {
    async fn index(&self, filename: &str, archive: Bytes) -> Result<Vec<ArchiveEntry>, JobError> {
        let form = Form::new().part("file", Part::stream(archive).file_name(filename.to_string()));

        let resp = self
            .client
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| JobError::Indexer(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(JobError::Indexer(format!(
                "indexing '{filename}' failed ({status}): {body}"
            )));
        }

        let parsed: IndexerResponse = resp
            .json()
            .await
            .map_err(|e| JobError::Indexer(e.to_string()))?;
        Ok(parsed.files)
    }
}
