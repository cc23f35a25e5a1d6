//! Wiring for the long-running service and one-shot CLI commands.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    db::{DbError, DbPool},
    jobs::{
        JobDispatcher, JobError, JobRef, JobRunner, LocalJobDispatcher, LoggingNotifier,
        MeetingReminderJob, ReminderNotifier,
    },
    retention::RetentionCleanupJob,
    services::{
        AttachmentService, MeetingService, ObjectStore, ObjectStoreError, UserService,
        create_object_store,
    },
};

/// Name the retention job is registered under with the dispatcher.
pub const RETENTION_JOB_NAME: &str = "retention-cleanup";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Storage error: {0}")]
    Storage(#[from] ObjectStoreError),

    #[error("Job error: {0}")]
    Jobs(#[from] JobError),
}

/// Every service, sharing one pool, one object store, one dispatcher and one
/// shutdown token.
pub struct App {
    pub config: AppConfig,
    pub db: DbPool,
    pub store: Arc<dyn ObjectStore>,
    pub attachments: AttachmentService,
    pub meetings: MeetingService,
    pub users: UserService,
    pub retention: RetentionCleanupJob,
    pub dispatcher: Arc<LocalJobDispatcher>,
    cancel: CancellationToken,
}

impl App {
    /// Open the database (running migrations if configured), the object
    /// store, and the job dispatcher.
    pub async fn build(config: AppConfig) -> Result<Self, AppError> {
        let db = DbPool::from_config(&config.database).await?;
        db.health_check().await?;
        if config.database.run_migrations {
            db.run_migrations().await?;
        }
        let store = create_object_store(&config.storage).await?;
        Ok(Self::assemble(config, db, store, Arc::new(LoggingNotifier)))
    }

    /// Build from already-open stores.
    pub fn assemble(
        config: AppConfig,
        db: DbPool,
        store: Arc<dyn ObjectStore>,
        notifier: Arc<dyn ReminderNotifier>,
    ) -> Self {
        let cancel = CancellationToken::new();

        let attachments = AttachmentService::new(db.clone(), store.clone(), &config.storage)
            .with_cancellation(cancel.child_token());
        let retention =
            RetentionCleanupJob::new(db.clone(), attachments.clone(), config.retention.clone())
                .with_cancellation(cancel.child_token());
        let reminders =
            MeetingReminderJob::new(db.clone(), notifier).with_cancellation(cancel.child_token());

        let runner = Arc::new(JobRunner::new(reminders, retention.clone()));
        let dispatcher = Arc::new(LocalJobDispatcher::new(runner, cancel.child_token()));

        let meetings = MeetingService::new(db.clone(), dispatcher.clone())
            .with_cancellation(cancel.child_token());
        let users = UserService::new(db.clone()).with_cancellation(cancel.child_token());

        Self {
            config,
            db,
            store,
            attachments,
            meetings,
            users,
            retention,
            dispatcher,
            cancel,
        }
    }

    /// Register recurring jobs with the dispatcher.
    pub async fn start_background(&self) -> Result<(), AppError> {
        let retention = &self.config.retention;
        if !retention.enabled {
            info!("Retention cleanup disabled by configuration");
            return Ok(());
        }

        self.dispatcher
            .register_recurring(RETENTION_JOB_NAME, JobRef::RetentionCleanup, &retention.cron)
            .await?;
        info!(
            cron = %retention.cron,
            threshold_days = retention.threshold_days,
            failure_scope = retention.failure_scope.as_str(),
            dry_run = retention.safety.dry_run,
            "Retention cleanup scheduled"
        );
        Ok(())
    }

    /// Stop the dispatcher and give running jobs [`SHUTDOWN_GRACE`] to finish
    /// before cancelling them, then close the pool.
    pub async fn shutdown(&self) {
        if tokio::time::timeout(SHUTDOWN_GRACE, self.dispatcher.shutdown())
            .await
            .is_err()
        {
            warn!("Timeout waiting for background jobs; cancelling them");
            self.cancel.cancel();
            self.dispatcher.shutdown().await;
        }
        self.cancel.cancel();
        self.db.close().await;
        info!("Shutdown complete");
    }
}
