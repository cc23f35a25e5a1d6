//! Reminder job body: tells participants a meeting is about to start.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::JobError;
use crate::{
    db::DbPool,
    models::{Meeting, User},
};

/// Delivers reminders. Delivery channels (email, chat) live behind this trait.
#[async_trait]
pub trait ReminderNotifier: Send + Sync {
    async fn notify(&self, meeting: &Meeting, recipients: &[User]) -> Result<(), JobError>;
}

/// Notifier that only logs. Used when no delivery channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl ReminderNotifier for LoggingNotifier {
    async fn notify(&self, meeting: &Meeting, recipients: &[User]) -> Result<(), JobError> {
        info!(
            meeting_id = %meeting.id,
            name = %meeting.name,
            start_at = %meeting.start_at,
            recipients = recipients.len(),
            "Meeting reminder"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderOutcome {
    Sent { recipients: usize },
    MeetingMissing,
    MeetingCanceled,
    MeetingStarted,
}

/// Loads a meeting and its participants and hands them to a notifier.
///
/// Reminders are scheduled once at creation, so the meeting may have been
/// canceled, purged or moved into the past by the time this runs; those
/// cases are skipped rather than treated as failures.
#[derive(Clone)]
pub struct MeetingReminderJob {
    db: DbPool,
    notifier: Arc<dyn ReminderNotifier>,
    cancel: CancellationToken,
}

impl MeetingReminderJob {
    pub fn new(db: DbPool, notifier: Arc<dyn ReminderNotifier>) -> Self {
        Self {
            db,
            notifier,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[instrument(skip(self))]
    pub async fn run(&self, meeting_id: Uuid) -> Result<ReminderOutcome, JobError> {
        let mut uow = self.db.unit_of_work(self.cancel.clone());

        let Some(meeting) = uow.meetings().get(meeting_id).await? else {
            debug!("Meeting no longer exists; skipping reminder");
            return Ok(ReminderOutcome::MeetingMissing);
        };
        if meeting.is_canceled {
            debug!("Meeting was canceled; skipping reminder");
            return Ok(ReminderOutcome::MeetingCanceled);
        }
        if meeting.start_at <= Utc::now() {
            debug!(start_at = %meeting.start_at, "Meeting already started; skipping reminder");
            return Ok(ReminderOutcome::MeetingStarted);
        }

        let participants = uow.participants().list(meeting_id).await?;
        let mut recipients = Vec::with_capacity(participants.len());
        for participant in &participants {
            if let Some(user) = uow.users().get(participant.user_id).await? {
                recipients.push(user);
            }
        }

        self.notifier.notify(&meeting, &recipients).await?;
        Ok(ReminderOutcome::Sent {
            recipients: recipients.len(),
        })
    }
}
