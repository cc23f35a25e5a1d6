use async_trait::async_trait;
use tracing::debug;

use super::{JobError, JobHandler, JobRef, MeetingReminderJob};
use crate::retention::RetentionCleanupJob;

/// Routes each [`JobRef`] to its job body.
#[derive(Clone)]
pub struct JobRunner {
    reminders: MeetingReminderJob,
    retention: RetentionCleanupJob,
}

impl JobRunner {
    pub fn new(reminders: MeetingReminderJob, retention: RetentionCleanupJob) -> Self {
        Self {
            reminders,
            retention,
        }
    }
}

#[async_trait]
impl JobHandler for JobRunner {
    async fn handle(&self, job: JobRef) -> Result<(), JobError> {
        match job {
            JobRef::MeetingReminder { meeting_id } => {
                let outcome = self.reminders.run(meeting_id).await?;
                debug!(%meeting_id, ?outcome, "Reminder job finished");
            }
            JobRef::RetentionCleanup => {
                let result = self
                    .retention
                    .run()
                    .await
                    .map_err(|e| JobError::Failed(e.to_string()))?;
                debug!(total = result.total(), "Retention job finished");
            }
        }
        Ok(())
    }
}
