//! Canceled-meeting retention configuration.
//!
//! Canceled meetings and their attachments are purged permanently once they
//! have been canceled for longer than the threshold.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! enabled = true
//! threshold_days = 30
//! # sec min hour day-of-month month day-of-week
//! cron = "0 0 3 * * *"
//! failure_scope = "batch"
//!
//! [retention.safety]
//! dry_run = false
//! max_meetings_per_run = 500
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Retention cleanup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Whether the recurring cleanup job is registered on `serve`.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Days a meeting must have been canceled before it is purged.
    /// Default: 30
    #[serde(default = "default_threshold_days")]
    pub threshold_days: u32,

    /// Cron expression (6 fields, seconds first) for the recurring job.
    /// Default: daily at 03:00 UTC
    #[serde(default = "default_cron")]
    pub cron: String,

    /// How far one failed attachment removal rolls back.
    #[serde(default)]
    pub failure_scope: FailureScope,

    /// Safety settings to prevent accidental data loss.
    #[serde(default)]
    pub safety: RetentionSafety,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_days: default_threshold_days(),
            cron: default_cron(),
            failure_scope: FailureScope::default(),
            safety: RetentionSafety::default(),
        }
    }
}

impl RetentionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold_days == 0 {
            return Err(ConfigError::Validation(
                "retention.threshold_days must be at least 1".into(),
            ));
        }
        if let Err(e) = cron::Schedule::from_str(&self.cron) {
            return Err(ConfigError::Validation(format!(
                "retention.cron is not a valid cron expression '{}': {}",
                self.cron, e
            )));
        }
        Ok(())
    }

    /// Grace period between cancellation and purge.
    pub fn threshold(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.threshold_days))
    }
}

/// Scope of a relational rollback when an attachment removal fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureScope {
    /// One transaction for the whole run; any failure rolls back every
    /// meeting in the batch and fails the run.
    #[default]
    Batch,

    /// One transaction per meeting; a failed meeting is rolled back and
    /// skipped, the others are still purged.
    Meeting,
}

impl FailureScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Meeting => "meeting",
        }
    }
}

/// Safety settings for retention operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionSafety {
    /// Log what would be purged without deleting anything.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Maximum meetings purged per run. The oldest cancellations go first;
    /// the rest wait for the next run. 0 means unlimited.
    /// Default: 0
    #[serde(default)]
    pub max_meetings_per_run: u32,
}

impl RetentionSafety {
    pub fn limit(&self) -> Option<u32> {
        (self.max_meetings_per_run > 0).then_some(self.max_meetings_per_run)
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold_days() -> u32 {
    30
}

fn default_cron() -> String {
    "0 0 3 * * *".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetentionConfig::default();
        assert!(config.enabled);
        assert_eq!(config.threshold_days, 30);
        assert_eq!(config.failure_scope, FailureScope::Batch);
        assert!(!config.safety.dry_run);
        assert_eq!(config.safety.limit(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let config: RetentionConfig = toml::from_str(
            r#"
            threshold_days = 7
            cron = "0 */15 * * * *"
            failure_scope = "meeting"

            [safety]
            dry_run = true
            max_meetings_per_run = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.threshold_days, 7);
        assert_eq!(config.threshold(), chrono::Duration::days(7));
        assert_eq!(config.failure_scope, FailureScope::Meeting);
        assert!(config.safety.dry_run);
        assert_eq!(config.safety.limit(), Some(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = RetentionConfig {
            threshold_days: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let config = RetentionConfig {
            cron: "every day at noon".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<RetentionConfig, _> = toml::from_str("interval_hours = 24");
        assert!(result.is_err());
    }
}
