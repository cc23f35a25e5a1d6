//! Background job infrastructure.
//!
//! Services never run deferred work themselves; they hand a [`JobRef`] to a
//! [`JobDispatcher`], which later passes it to a [`JobHandler`]:
//!
//! - **Meeting reminders**: one-shot jobs scheduled 20 minutes before a
//!   meeting starts.
//! - **Retention cleanup**: a recurring job driven by a cron expression that
//!   purges canceled meetings past the retention threshold.
//!
//! The dispatcher owns timing and concurrency. [`LocalJobDispatcher`] runs
//! everything on tokio tasks and guarantees at most one concurrent execution
//! per recurring registration. It has no retry engine; failed runs are logged
//! and counted.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! cron = "0 0 3 * * *"   # sec min hour day-of-month month day-of-week
//! ```

mod local;
mod meeting_reminder;
mod runner;

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
pub use local::LocalJobDispatcher;
pub use meeting_reminder::{LoggingNotifier, MeetingReminderJob, ReminderNotifier, ReminderOutcome};
pub use runner::JobRunner;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::DbError;

/// A serializable reference to a unit of deferred work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobRef {
    MeetingReminder { meeting_id: Uuid },
    RetentionCleanup,
}

impl JobRef {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MeetingReminder { .. } => "meeting_reminder",
            Self::RetentionCleanup => "retention_cleanup",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Dispatcher is shutting down")]
    ShuttingDown,

    #[error("Recurring job '{0}' is already registered")]
    DuplicateRecurring(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Job failed: {0}")]
    Failed(String),
}

/// Schedules jobs for later execution.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Run `job` as soon as possible.
    async fn enqueue_now(&self, job: JobRef) -> Result<(), JobError>;

    /// Run `job` once at `at`. A time in the past runs immediately.
    async fn schedule_at(&self, job: JobRef, at: DateTime<Utc>) -> Result<(), JobError>;

    /// Run `job` on every tick of a 6-field cron expression. `name` must be
    /// unique per dispatcher.
    async fn register_recurring(&self, name: &str, job: JobRef, cron: &str)
    -> Result<(), JobError>;
}

/// Executes jobs handed over by a dispatcher.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: JobRef) -> Result<(), JobError>;
}

/// Parse a 6-field (seconds-first) cron expression.
pub fn parse_cron(expression: &str) -> Result<Schedule, JobError> {
    Schedule::from_str(expression).map_err(|e| JobError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ref_serialization() {
        let meeting_id = Uuid::new_v4();
        let job = JobRef::MeetingReminder { meeting_id };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["type"], "meeting_reminder");
        assert_eq!(json["meeting_id"], meeting_id.to_string());

        let json = serde_json::to_value(JobRef::RetentionCleanup).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "retention_cleanup" }));
    }

    #[test]
    fn test_job_ref_kind() {
        assert_eq!(
            JobRef::MeetingReminder {
                meeting_id: Uuid::nil()
            }
            .kind(),
            "meeting_reminder"
        );
        assert_eq!(JobRef::RetentionCleanup.kind(), "retention_cleanup");
    }

    #[test]
    fn test_parse_cron() {
        assert!(parse_cron("0 0 3 * * *").is_ok());
        assert!(matches!(
            parse_cron("every night"),
            Err(JobError::InvalidCron { .. })
        ));
    }
}
