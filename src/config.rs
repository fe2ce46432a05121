use thiserror::Error;

use crate::auth::UserId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub services: ServicesConfig,
    pub uploads: UploadConfig,
    pub auth: AuthConfig,
    /// Enables dangerous operations like purge. Must never be true in production.
    pub test_mode: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory of the artifact store
    pub artifact_path: String,
    /// Drop directory scanned by the archive ingestion job
    pub ingest_dir: String,
}

#[derive(Debug, Clone, Default)]
pub struct ServicesConfig {
    pub validator_url: Option<String>,
    pub archive_indexer_url: Option<String>,
    /// Absent means notifications are only logged
    pub notification_webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Body limit for a single chunk request
    pub max_chunk_size: u64,
    /// Largest total upload an identity in audit may declare
    pub audit_max_upload_size: u64,
    /// Open submissions an identity in audit may hold at once
    pub audit_submission_limit: u64,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Identities allowed through God-only routes regardless of roles
    pub bypass_user_ids: Vec<UserId>,
    pub session_ttl_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            artifact_path: "./artifacts".to_string(),
            ingest_dir: "./ingest".to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 100 * 1024 * 1024, // 100MiB
            audit_max_upload_size: 500_000_000,
            audit_submission_limit: 1,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bypass_user_ids: Vec::new(),
            session_ttl_seconds: 30 * 24 * 60 * 60,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let test_mode = std::env::var("TEST_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let defaults = StorageConfig::default();
        let storage = StorageConfig {
            artifact_path: std::env::var("ARTIFACT_STORAGE_PATH")
                .unwrap_or(defaults.artifact_path),
            ingest_dir: std::env::var("INGEST_DIR").unwrap_or(defaults.ingest_dir),
        };

        let services = ServicesConfig {
            validator_url: non_empty_var("VALIDATOR_URL"),
            archive_indexer_url: non_empty_var("ARCHIVE_INDEXER_URL"),
            notification_webhook_url: non_empty_var("NOTIFICATION_WEBHOOK_URL"),
        };

        let defaults = UploadConfig::default();
        let uploads = UploadConfig {
            max_chunk_size: parsed_var("MAX_CHUNK_SIZE").unwrap_or(defaults.max_chunk_size),
            audit_max_upload_size: parsed_var("AUDIT_MAX_UPLOAD_SIZE")
                .unwrap_or(defaults.audit_max_upload_size),
            audit_submission_limit: parsed_var("AUDIT_SUBMISSION_LIMIT")
                .unwrap_or(defaults.audit_submission_limit),
        };

        let bypass_user_ids = match std::env::var("GOD_BYPASS_USER_IDS") {
            Ok(raw) => parse_user_ids(&raw)?,
            Err(_) => Vec::new(),
        };

        let auth = AuthConfig {
            bypass_user_ids,
            session_ttl_seconds: parsed_var("SESSION_TTL_SECONDS")
                .unwrap_or(AuthConfig::default().session_ttl_seconds),
        };

        let config = Config {
            server: ServerConfig {
                bind_address,
                data_dir,
            },
            storage,
            services,
            uploads,
            auth,
            test_mode,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_address.is_empty() {
            return Err(ConfigError::ValidationError(
                "BIND_ADDRESS cannot be empty".to_string(),
            ));
        }

        if self.services.validator_url.is_none() && !self.test_mode {
            return Err(ConfigError::ValidationError(
                "VALIDATOR_URL is required outside test mode".to_string(),
            ));
        }

        if self.uploads.max_chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_CHUNK_SIZE must be positive".to_string(),
            ));
        }

        if !self.auth.bypass_user_ids.is_empty() {
            tracing::warn!(
                users = ?self.auth.bypass_user_ids,
                "Identity bypass is active for privileged routes"
            );
        }

        Ok(())
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Parse a comma-separated list of non-zero user ids.
pub fn parse_user_ids(raw: &str) -> Result<Vec<UserId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<u64>() {
            Ok(id) if id != 0 => Ok(UserId(id)),
            _ => Err(ConfigError::ValidationError(format!(
                "GOD_BYPASS_USER_IDS contains invalid user id '{s}'"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_ids_parse() {
        assert_eq!(
            parse_user_ids(" 42, 7 ,").unwrap(),
            vec![UserId(42), UserId(7)]
        );
        assert!(parse_user_ids("").unwrap().is_empty());
        assert!(parse_user_ids("0").is_err());
        assert!(parse_user_ids("colin").is_err());
    }
}
