pub mod access;
mod attachments;
mod meetings;
pub mod object_store;
mod users;

use std::future::Future;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

pub use attachments::AttachmentService;
pub use meetings::{MeetingService, REMINDER_LEAD};
#[cfg(feature = "s3-storage")]
pub use object_store::S3ObjectStore;
pub use object_store::{
    FilesystemObjectStore, MemoryObjectStore, ObjectStore, ObjectStoreError, ObjectStoreResult,
    create_object_store,
};
pub use users::UserService;

use crate::{
    db::{DbError, UnitOfWork},
    jobs::JobError,
};

/// Infrastructure failures. Always propagated, always after rolling back any
/// transaction the failing call owned.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[source] DbError),

    #[error("Storage error: {0}")]
    Storage(#[from] ObjectStoreError),

    #[error("Job dispatch error: {0}")]
    Dispatch(#[from] JobError),

    #[error("Organizer {0} does not exist")]
    OrganizerNotFound(Uuid),

    #[error("Failed to queue removal for file {file_id}: {reason}")]
    RemovalFailed { file_id: Uuid, reason: Failure },

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Cancelled => ServiceError::Cancelled,
            other => ServiceError::Database(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Business-rule outcomes. Returned inside `Ok` so callers can render them
/// without treating them as faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Failure {
    #[error("Meeting not found")]
    MeetingNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("Attachment not found")]
    AttachmentNotFound,

    #[error("Role not found")]
    RoleNotFound,

    #[error("Not authorized")]
    NotAuthorized,

    #[error("User is not a participant of this meeting")]
    NotParticipant,

    #[error("User not found in meeting")]
    NotInMeeting,

    #[error("Organizer cannot be removed from their own meeting")]
    OrganizerCannotBeRemoved,

    #[error("Email is already registered")]
    EmailInUse,
}

impl Failure {
    /// Stable snake_case label for logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MeetingNotFound => "meeting_not_found",
            Self::UserNotFound => "user_not_found",
            Self::AttachmentNotFound => "attachment_not_found",
            Self::RoleNotFound => "role_not_found",
            Self::NotAuthorized => "not_authorized",
            Self::NotParticipant => "not_participant",
            Self::NotInMeeting => "not_in_meeting",
            Self::OrganizerCannotBeRemoved => "organizer_cannot_be_removed",
            Self::EmailInUse => "email_in_use",
        }
    }
}

/// Result of a business operation: the value, or the rule it broke.
pub type Outcome<T> = Result<T, Failure>;

/// Roll back a transaction the caller owns after `err`. The rollback error,
/// if any, is logged so that `err` is what propagates.
pub(crate) async fn abandon(uow: &mut UnitOfWork, err: &ServiceError) {
    warn!(error = %err, "Rolling back transaction");
    if let Err(rollback_err) = uow.rollback().await {
        warn!(error = %rollback_err, "Rollback failed");
    }
}

/// Finish a transaction the caller owns: commit on success, roll back on a
/// business failure or an error.
pub(crate) async fn settle<T>(
    uow: &mut UnitOfWork,
    result: ServiceResult<Outcome<T>>,
) -> ServiceResult<Outcome<T>> {
    match result {
        Ok(Ok(value)) => {
            uow.commit().await?;
            Ok(Ok(value))
        }
        Ok(Err(failure)) => {
            uow.rollback().await?;
            Ok(Err(failure))
        }
        Err(err) => {
            abandon(uow, &err).await;
            Err(err)
        }
    }
}

/// Await an object-store call unless `cancel` fires first.
pub(crate) async fn storage_call<T, F>(cancel: &CancellationToken, fut: F) -> ServiceResult<T>
where
    F: Future<Output = ObjectStoreResult<T>>,
{
    match cancel.run_until_cancelled(fut).await {
        Some(result) => Ok(result?),
        None => Err(ServiceError::Cancelled),
    }
}
