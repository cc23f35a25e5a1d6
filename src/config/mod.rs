//! Configuration for the meeting service.
//!
//! The service is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [database]
//! path = "/var/lib/meetkeeper/meetkeeper.db"
//!
//! [storage]
//! backend = "s3"
//! bucket = "meeting-attachments"
//!
//! [storage.s3]
//! region = "eu-west-1"
//! secret_access_key = "${AWS_SECRET_ACCESS_KEY}"
//! access_key_id = "${AWS_ACCESS_KEY_ID}"
//!
//! [retention]
//! threshold_days = 30
//! cron = "0 0 3 * * *"
//! ```

mod database;
mod observability;
mod retention;
mod storage;

use std::path::Path;

pub use database::*;
pub use observability::*;
use once_cell::sync::Lazy;
use regex::Regex;
pub use retention::*;
use serde::{Deserialize, Serialize};
pub use storage::*;

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is a valid regex"));

/// Root configuration.
///
/// Every section is optional with sensible defaults, so an empty file runs a
/// local SQLite database with filesystem attachment storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Relational store for meetings, participants and attachment metadata.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Object store for attachment bytes.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Purge policy for canceled meetings.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        // Pre-check: detect feature-gated config values before typed deserialization
        let raw: toml::Value = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        check_disabled_features(&raw)?;

        let config: AppConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.storage.validate()?;
        self.retention.validate()?;
        self.observability.validate()?;

        if self.database.is_in_memory() {
            tracing::warn!("Using an in-memory database; all meetings are lost on exit");
        }
        if self.storage.backend == ObjectStoreBackend::Memory && !self.database.is_in_memory() {
            tracing::warn!(
                "Persistent database with in-memory object storage: attachment rows will \
                 outlive their blobs after a restart"
            );
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Check for feature-gated configuration values before typed deserialization,
/// so users get the feature to rebuild with instead of a bare serde error.
fn check_disabled_features(raw: &toml::Value) -> Result<(), ConfigError> {
    let mut issues: Vec<(String, &str)> = Vec::new();

    if let Some(backend) = raw
        .get("storage")
        .and_then(|v| v.get("backend"))
        .and_then(|v| v.as_str())
    {
        check_storage_feature(backend, &mut issues);
    }

    if raw
        .get("observability")
        .and_then(|v| v.get("metrics"))
        .and_then(|v| v.get("enabled"))
        .and_then(|v| v.as_bool())
        == Some(true)
    {
        check_metrics_feature(&mut issues);
    }

    if issues.is_empty() {
        return Ok(());
    }

    let details = issues
        .iter()
        .map(|(msg, _)| msg.as_str())
        .collect::<Vec<_>>()
        .join("\n  - ");
    let features = issues
        .iter()
        .map(|(_, feat)| *feat)
        .collect::<Vec<_>>()
        .join(",");

    Err(ConfigError::Validation(format!(
        "Configuration requires features not compiled in this build:\n  \
         - {details}\n\n\
         Rebuild with: cargo build --features {features}\n\
         Or use the 'full' profile: cargo build --features full"
    )))
}

fn check_storage_feature(backend: &str, _issues: &mut Vec<(String, &str)>) {
    match backend {
        #[cfg(not(feature = "s3-storage"))]
        "s3" => _issues.push((
            "storage backend 's3' requires the 's3-storage' feature".into(),
            "s3-storage",
        )),
        _ => {}
    }
}

fn check_metrics_feature(_issues: &mut Vec<(String, &str)>) {
    #[cfg(not(feature = "prometheus"))]
    _issues.push((
        "observability.metrics.enabled requires the 'prometheus' feature".into(),
        "prometheus",
    ));
}

/// Expand `${VAR_NAME}` references, leaving anything after a `#` comment alone.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in ENV_VAR_PATTERN.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            // Skip if this variable is inside a comment
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);

            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
