use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::{FailureScope, RetentionConfig},
    db::{DbPool, UnitOfWork},
    models::ExpiredMeeting,
    observability::metrics,
    services::{AttachmentService, ServiceError, ServiceResult, abandon},
};

/// Results from a single retention run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RetentionRunResult {
    /// Meetings that matched the retention policy.
    pub meetings_selected: u64,
    /// Meetings hard-deleted.
    pub meetings_deleted: u64,
    /// Attachments whose blob and row were deleted.
    pub attachments_deleted: u64,
    /// Meetings left in place because their purge failed (meeting scope only).
    pub failed_meetings: Vec<Uuid>,
    pub dry_run: bool,
    pub duration_ms: u64,
}

impl RetentionRunResult {
    /// Total number of records deleted.
    pub fn total(&self) -> u64 {
        self.meetings_deleted + self.attachments_deleted
    }

    /// Check if any records were deleted.
    pub fn has_deletions(&self) -> bool {
        self.total() > 0
    }
}

/// Purges canceled meetings older than the retention threshold.
///
/// The dispatcher is expected to run at most one pass at a time.
#[derive(Clone)]
pub struct RetentionCleanupJob {
    db: DbPool,
    attachments: AttachmentService,
    config: RetentionConfig,
    cancel: CancellationToken,
}

impl RetentionCleanupJob {
    pub fn new(db: DbPool, attachments: AttachmentService, config: RetentionConfig) -> Self {
        Self {
            db,
            attachments,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.attachments = self.attachments.with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Run a single pass against the current time.
    pub async fn run(&self) -> ServiceResult<RetentionRunResult> {
        self.run_at(Utc::now()).await
    }

    /// Run a single pass as if the current time were `now`.
    #[instrument(skip(self), fields(scope = self.config.failure_scope.as_str(), dry_run = self.config.safety.dry_run))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> ServiceResult<RetentionRunResult> {
        let start = Instant::now();
        let cutoff = now - self.config.threshold();
        let mut result = RetentionRunResult {
            dry_run: self.config.safety.dry_run,
            ..Default::default()
        };

        let mut uow = self.db.unit_of_work(self.cancel.clone());
        let expired = uow
            .meetings()
            .list_expired(cutoff, self.config.safety.limit())
            .await?;
        result.meetings_selected = expired.len() as u64;

        if expired.is_empty() {
            result.duration_ms = start.elapsed().as_millis() as u64;
            debug!(%cutoff, "No canceled meetings past the retention threshold");
            return Ok(result);
        }

        if self.config.safety.dry_run {
            let attachments: usize = expired.iter().map(|m| m.attachments.len()).sum();
            info!(
                %cutoff,
                meetings = expired.len(),
                attachments,
                "DRY RUN: Would purge canceled meetings before {}",
                cutoff
            );
            result.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(result);
        }

        match self.config.failure_scope {
            FailureScope::Batch => {
                let attachments = self.purge_in_transaction(&mut uow, &expired).await?;
                result.attachments_deleted = attachments;
                result.meetings_deleted = expired.len() as u64;
            }
            FailureScope::Meeting => {
                for meeting in &expired {
                    match self
                        .purge_in_transaction(&mut uow, std::slice::from_ref(meeting))
                        .await
                    {
                        Ok(attachments) => {
                            result.attachments_deleted += attachments;
                            result.meetings_deleted += 1;
                        }
                        Err(ServiceError::Cancelled) => return Err(ServiceError::Cancelled),
                        Err(e) => {
                            error!(
                                meeting_id = %meeting.meeting.id,
                                error = %e,
                                "Failed to purge meeting; continuing with the rest"
                            );
                            result.failed_meetings.push(meeting.meeting.id);
                        }
                    }
                }
            }
        }

        metrics::record_retention_deletion("meetings", result.meetings_deleted);
        metrics::record_retention_deletion("attachments", result.attachments_deleted);

        result.duration_ms = start.elapsed().as_millis() as u64;
        if result.failed_meetings.is_empty() {
            info!(
                meetings = result.meetings_deleted,
                attachments = result.attachments_deleted,
                duration_ms = result.duration_ms,
                "Retention run complete"
            );
        } else {
            warn!(
                meetings = result.meetings_deleted,
                attachments = result.attachments_deleted,
                failed = result.failed_meetings.len(),
                duration_ms = result.duration_ms,
                "Retention run complete with failures"
            );
        }
        Ok(result)
    }

    /// Purge `meetings` inside one transaction and return how many
    /// attachments went with them.
    async fn purge_in_transaction(
        &self,
        uow: &mut UnitOfWork,
        meetings: &[ExpiredMeeting],
    ) -> ServiceResult<u64> {
        uow.begin_transaction().await?;

        let attachments = match self.stage_purge(uow, meetings).await {
            Ok(count) => count,
            Err(e) => {
                abandon(uow, &e).await;
                metrics::record_retention_error(self.config.failure_scope.as_str());
                return Err(e);
            }
        };

        if let Err(e) = uow.commit().await {
            metrics::record_retention_error(self.config.failure_scope.as_str());
            return Err(e.into());
        }
        Ok(attachments)
    }

    async fn stage_purge(
        &self,
        uow: &mut UnitOfWork,
        meetings: &[ExpiredMeeting],
    ) -> ServiceResult<u64> {
        let mut attachments = 0;

        for expired in meetings {
            let meeting = &expired.meeting;
            for attachment in &expired.attachments {
                let outcome = self
                    .attachments
                    .remove(
                        Some(&mut *uow),
                        meeting.id,
                        attachment.id,
                        meeting.organizer_id,
                    )
                    .await?;
                if let Err(reason) = outcome {
                    return Err(ServiceError::RemovalFailed {
                        file_id: attachment.id,
                        reason,
                    });
                }
                attachments += 1;
            }
        }

        let ids: Vec<Uuid> = meetings.iter().map(|m| m.meeting.id).collect();
        debug!(meetings = ids.len(), attachments, "Staging participant and meeting deletes");
        uow.participants().remove_for_meetings(ids.clone());
        uow.meetings().remove_range(ids);
        Ok(attachments)
    }
}
