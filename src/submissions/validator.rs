use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("validator unreachable: {0}")]
    Unreachable(String),
    #[error("validator rejected the request ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("unreadable validator response: {0}")]
    Decode(String),
}

/// Findings reported for one curation package.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ValidationReport {
    #[serde(default)]
    pub curation_errors: Vec<String>,
    #[serde(default)]
    pub curation_warnings: Vec<String>,
    #[serde(default)]
    pub is_extreme: bool,
    /// Structured curation metadata, passed through as-is.
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.curation_errors.is_empty() && self.curation_warnings.is_empty()
    }
}

/// External curation validator.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, filename: &str, artifact: Bytes)
        -> Result<ValidationReport, ValidatorError>;
}

/// Validator service reached over HTTP: the package is POSTed as the
/// multipart field `file` to `{base}/upload`.
pub struct HttpValidator {
    base_url: String,
    client: Client,
}

impl HttpValidator {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Validator for HttpValidator {
    async fn validate(
        &self,
        filename: &str,
        artifact: Bytes,
    ) -> Result<ValidationReport, ValidatorError> {
        let part = Part::stream(artifact).file_name(filename.to_string());
        let form = Form::new().part("file", part);

        tracing::debug!(filename, url = %self.base_url, "sending package to validator");
        let resp = self
            .client
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ValidatorError::Unreachable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ValidatorError::Status { status, body });
        }

        resp.json::<ValidationReport>()
            .await
            .map_err(|e| ValidatorError::Decode(e.to_string()))
    }
}

/// Reports every package clean. Stands in for the validator service in test
/// mode when `VALIDATOR_URL` is unset.
pub struct NoopValidator;

#[async_trait]
impl Validator for NoopValidator {
    async fn validate(
        &self,
        filename: &str,
        _artifact: Bytes,
    ) -> Result<ValidationReport, ValidatorError> {
        tracing::debug!(filename, "validation skipped");
        Ok(ValidationReport::default())
    }
}
