//! In-process job dispatcher backed by tokio tasks.

use std::{collections::HashSet, sync::Arc, time::Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use super::{JobDispatcher, JobError, JobHandler, JobRef, parse_cron};
use crate::observability::metrics;

/// Runs jobs on tasks tracked by a [`TaskTracker`].
///
/// Each recurring registration drives its own loop and awaits each run before
/// computing the next tick, so a slow run delays the next one instead of
/// overlapping with it.
pub struct LocalJobDispatcher {
    handler: Arc<dyn JobHandler>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    recurring: Mutex<HashSet<String>>,
}

impl LocalJobDispatcher {
    pub fn new(handler: Arc<dyn JobHandler>, cancel: CancellationToken) -> Self {
        Self {
            handler,
            tracker: TaskTracker::new(),
            cancel,
            recurring: Mutex::new(HashSet::new()),
        }
    }

    /// Stop accepting jobs, drop pending timers, and wait for running jobs.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Job dispatcher stopped");
    }

    /// Number of tasks still alive (scheduled, recurring or running).
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    fn ensure_running(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() || self.tracker.is_closed() {
            return Err(JobError::ShuttingDown);
        }
        Ok(())
    }
}

async fn execute(handler: &Arc<dyn JobHandler>, job: JobRef) {
    let kind = job.kind();
    let start = Instant::now();
    let result = handler.handle(job).await;
    let elapsed = start.elapsed().as_secs_f64();

    match result {
        Ok(()) => {
            debug!(job = kind, duration_secs = elapsed, "Job completed");
            metrics::record_job_execution(kind, "success", elapsed);
        }
        Err(e) => {
            error!(job = kind, error = %e, duration_secs = elapsed, "Job failed");
            metrics::record_job_execution(kind, "error", elapsed);
        }
    }
}

/// Sleep until `at`, returning `false` if cancelled first.
async fn sleep_until(cancel: &CancellationToken, at: DateTime<Utc>) -> bool {
    let delay = (at - Utc::now()).to_std().unwrap_or_default();
    cancel
        .run_until_cancelled(tokio::time::sleep(delay))
        .await
        .is_some()
}

#[async_trait]
impl JobDispatcher for LocalJobDispatcher {
    async fn enqueue_now(&self, job: JobRef) -> Result<(), JobError> {
        self.ensure_running()?;
        debug!(job = job.kind(), "Job enqueued");

        let handler = self.handler.clone();
        self.tracker.spawn(async move { execute(&handler, job).await });
        Ok(())
    }

    async fn schedule_at(&self, job: JobRef, at: DateTime<Utc>) -> Result<(), JobError> {
        self.ensure_running()?;
        debug!(job = job.kind(), run_at = %at, "Job scheduled");

        let handler = self.handler.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            if sleep_until(&cancel, at).await {
                execute(&handler, job).await;
            } else {
                debug!(job = job.kind(), "Scheduled job dropped on shutdown");
            }
        });
        Ok(())
    }

    async fn register_recurring(
        &self,
        name: &str,
        job: JobRef,
        cron: &str,
    ) -> Result<(), JobError> {
        self.ensure_running()?;
        let schedule = parse_cron(cron)?;

        if !self.recurring.lock().insert(name.to_string()) {
            return Err(JobError::DuplicateRecurring(name.to_string()));
        }

        info!(name, job = job.kind(), cron, "Recurring job registered");

        let handler = self.handler.clone();
        let cancel = self.cancel.clone();
        let name = name.to_string();
        self.tracker.spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    warn!(name = %name, "Cron schedule has no upcoming ticks; stopping");
                    break;
                };
                if !sleep_until(&cancel, next).await {
                    break;
                }
                execute(&handler, job.clone()).await;
            }
            debug!(name = %name, "Recurring job stopped");
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;

    struct ChannelHandler {
        tx: mpsc::UnboundedSender<JobRef>,
    }

    #[async_trait]
    impl JobHandler for ChannelHandler {
        async fn handle(&self, job: JobRef) -> Result<(), JobError> {
            let _ = self.tx.send(job);
            Ok(())
        }
    }

    fn dispatcher() -> (LocalJobDispatcher, mpsc::UnboundedReceiver<JobRef>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(ChannelHandler { tx });
        (
            LocalJobDispatcher::new(handler, CancellationToken::new()),
            rx,
        )
    }

    async fn next_job(rx: &mut mpsc::UnboundedReceiver<JobRef>, wait: Duration) -> Option<JobRef> {
        tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn test_enqueue_now_runs_job() {
        let (dispatcher, mut rx) = dispatcher();
        dispatcher.enqueue_now(JobRef::RetentionCleanup).await.unwrap();

        let job = next_job(&mut rx, Duration::from_secs(1)).await;
        assert_eq!(job, Some(JobRef::RetentionCleanup));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_schedule_in_past_runs_immediately() {
        let (dispatcher, mut rx) = dispatcher();
        let job = JobRef::MeetingReminder {
            meeting_id: Uuid::new_v4(),
        };
        dispatcher
            .schedule_at(job.clone(), Utc::now() - TimeDelta::minutes(5))
            .await
            .unwrap();

        assert_eq!(next_job(&mut rx, Duration::from_secs(1)).await, Some(job));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drops_future_jobs() {
        let (dispatcher, mut rx) = dispatcher();
        dispatcher
            .schedule_at(JobRef::RetentionCleanup, Utc::now() + TimeDelta::hours(1))
            .await
            .unwrap();
        assert_eq!(dispatcher.active_tasks(), 1);

        dispatcher.shutdown().await;
        assert_eq!(dispatcher.active_tasks(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejects_jobs_after_shutdown() {
        let (dispatcher, _rx) = dispatcher();
        dispatcher.shutdown().await;

        let result = dispatcher.enqueue_now(JobRef::RetentionCleanup).await;
        assert!(matches!(result, Err(JobError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_register_recurring_validates_cron() {
        let (dispatcher, _rx) = dispatcher();
        let result = dispatcher
            .register_recurring("cleanup", JobRef::RetentionCleanup, "not a cron")
            .await;
        assert!(matches!(result, Err(JobError::InvalidCron { .. })));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_recurring_rejects_duplicates() {
        let (dispatcher, _rx) = dispatcher();
        dispatcher
            .register_recurring("cleanup", JobRef::RetentionCleanup, "0 0 3 * * *")
            .await
            .unwrap();
        let result = dispatcher
            .register_recurring("cleanup", JobRef::RetentionCleanup, "0 0 4 * * *")
            .await;
        assert!(matches!(result, Err(JobError::DuplicateRecurring(name)) if name == "cleanup"));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_recurring_job_fires() {
        let (dispatcher, mut rx) = dispatcher();
        dispatcher
            .register_recurring("every-second", JobRef::RetentionCleanup, "* * * * * *")
            .await
            .unwrap();

        let job = next_job(&mut rx, Duration::from_secs(3)).await;
        assert_eq!(job, Some(JobRef::RetentionCleanup));
        dispatcher.shutdown().await;
    }
}
