use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::services::LoggingMode;
use crate::pipeline::{PipelineConfig, DEFAULT_CHUNK_SIZE};

/// Prefix of every environment variable read by [`ServiceConfig::from_env`].
pub const ENV_PREFIX: &str = "BULK_ISSUANCE";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // Credential backend
    /// Base URL of the credential backend
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Bearer token for the credential backend
    #[serde(default, skip_serializing)]
    pub backend_token: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Include query parameters (sensitive values redacted) in request logs
    #[serde(default)]
    pub log_query_params: bool,

    // Pipeline
    /// Issuance calls in flight at once
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Seconds per credential assumed before the first chunk completes
    #[serde(default = "default_assumed_seconds_per_item")]
    pub assumed_seconds_per_item: f64,

    // Local storage
    /// SQLite file holding the batch history
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Directory receiving the report CSVs
    #[serde(default = "default_report_dir")]
    pub report_dir: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_backend_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_assumed_seconds_per_item() -> f64 {
    2.0
}

fn default_database_path() -> String {
    "bulk_issuance.db".to_string()
}

fn default_report_dir() -> String {
    "reports".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()
    }

    /// Pipeline settings, validated.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, AppError> {
        let config = PipelineConfig {
            chunk_size: self.chunk_size,
            assumed_seconds_per_item: self.assumed_seconds_per_item,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// How backend request URLs appear in the logs.
    pub fn logging_mode(&self) -> LoggingMode {
        if self.log_query_params {
            LoggingMode::PathAndQueryRedacted
        } else {
            LoggingMode::PathOnly
        }
    }

    pub fn backend_token(&self) -> Option<SecretString> {
        self.backend_token
            .as_ref()
            .filter(|t| !t.is_empty())
            .map(|t| SecretString::from(t.clone()))
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path)
    }

    pub fn report_dir(&self) -> PathBuf {
        PathBuf::from(&self.report_dir)
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}
