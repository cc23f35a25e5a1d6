//! Relational transaction boundary.
//!
//! A [`UnitOfWork`] owns at most one SQLite transaction and the repositories
//! that read and write through it. Reads run immediately against the active
//! executor (the transaction if one is open, otherwise a pooled autocommit
//! connection). Writes are staged as [`PendingWrite`]s and applied in the order
//! they were issued when the unit of work is flushed:
//!
//! - [`UnitOfWork::commit`] flushes, then commits. A failure in either step
//!   rolls the transaction back before the error is returned.
//! - [`UnitOfWork::complete`] flushes without a transaction, for call sites
//!   that accept per-statement (eventual) consistency.
//!
//! Every await point observes the unit of work's [`CancellationToken`]; a
//! cancelled call fails with [`DbError::Cancelled`] and leaves rollback to the
//! caller (or to drop, which always rolls back an open transaction).

use std::future::Future;

use sqlx::{
    Sqlite, SqliteConnection, SqlitePool, Transaction, pool::PoolConnection,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{
    error::{DbError, DbResult},
    sqlite::{self, AttachmentRepo, MeetingRepo, ParticipantRepo, RoleRepo, UserRepo},
};
use crate::models::{Attachment, Meeting, Participant, User};

/// A write staged on a unit of work, applied on the next flush.
#[derive(Debug, Clone)]
pub enum PendingWrite {
    InsertMeeting(Meeting),
    UpdateMeeting(Meeting),
    DeleteMeetings(Vec<Uuid>),
    InsertParticipant(Participant),
    DeleteParticipant { meeting_id: Uuid, user_id: Uuid },
    DeleteParticipantsOfMeetings(Vec<Uuid>),
    InsertAttachment(Attachment),
    DeleteAttachment(Uuid),
    InsertUser(User),
    AssignRole { user_id: Uuid, role_id: Uuid },
}

impl PendingWrite {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsertMeeting(_) => "insert_meeting",
            Self::UpdateMeeting(_) => "update_meeting",
            Self::DeleteMeetings(_) => "delete_meetings",
            Self::InsertParticipant(_) => "insert_participant",
            Self::DeleteParticipant { .. } => "delete_participant",
            Self::DeleteParticipantsOfMeetings(_) => "delete_participants_of_meetings",
            Self::InsertAttachment(_) => "insert_attachment",
            Self::DeleteAttachment(_) => "delete_attachment",
            Self::InsertUser(_) => "insert_user",
            Self::AssignRole { .. } => "assign_role",
        }
    }

    async fn execute(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        match self {
            Self::InsertMeeting(m) => sqlite::meetings::insert(conn, m).await,
            Self::UpdateMeeting(m) => sqlite::meetings::update(conn, m).await,
            Self::DeleteMeetings(ids) => sqlite::meetings::delete_many(conn, ids).await,
            Self::InsertParticipant(p) => sqlite::participants::insert(conn, p).await,
            Self::DeleteParticipant {
                meeting_id,
                user_id,
            } => sqlite::participants::delete(conn, *meeting_id, *user_id).await,
            Self::DeleteParticipantsOfMeetings(ids) => {
                sqlite::participants::delete_for_meetings(conn, ids).await
            }
            Self::InsertAttachment(a) => sqlite::attachments::insert(conn, a).await,
            Self::DeleteAttachment(id) => sqlite::attachments::delete(conn, *id).await,
            Self::InsertUser(u) => sqlite::users::insert(conn, u).await,
            Self::AssignRole { user_id, role_id } => {
                sqlite::roles::assign(conn, *user_id, *role_id).await
            }
        }
    }
}

/// Await `fut` unless `cancel` fires first.
pub(crate) async fn guard<T, F>(cancel: &CancellationToken, fut: F) -> DbResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match cancel.run_until_cancelled(fut).await {
        Some(result) => Ok(result?),
        None => Err(DbError::Cancelled),
    }
}

async fn apply(
    conn: &mut SqliteConnection,
    cancel: &CancellationToken,
    writes: Vec<PendingWrite>,
) -> DbResult<usize> {
    let total = writes.len();
    for write in writes {
        let kind = write.kind();
        if let Err(e) = guard(cancel, write.execute(&mut *conn)).await {
            warn!(kind, error = %e, "Pending write failed");
            return Err(e);
        }
    }
    Ok(total)
}

/// Transaction boundary over the relational store.
///
/// Only one transaction per instance is ever permitted.
pub struct UnitOfWork {
    pool: SqlitePool,
    tx: Option<Transaction<'static, Sqlite>>,
    conn: Option<PoolConnection<Sqlite>>,
    pending: Vec<PendingWrite>,
    cancel: CancellationToken,
}

impl UnitOfWork {
    pub(crate) fn new(pool: SqlitePool, cancel: CancellationToken) -> Self {
        Self {
            pool,
            tx: None,
            conn: None,
            pending: Vec::new(),
            cancel,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Number of staged writes not yet flushed.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    pub fn meetings(&mut self) -> MeetingRepo<'_> {
        MeetingRepo::new(self)
    }

    pub fn participants(&mut self) -> ParticipantRepo<'_> {
        ParticipantRepo::new(self)
    }

    pub fn attachments(&mut self) -> AttachmentRepo<'_> {
        AttachmentRepo::new(self)
    }

    pub fn users(&mut self) -> UserRepo<'_> {
        UserRepo::new(self)
    }

    pub fn roles(&mut self) -> RoleRepo<'_> {
        RoleRepo::new(self)
    }

    pub(crate) fn stage(&mut self, write: PendingWrite) {
        self.pending.push(write);
    }

    /// The executor reads and flushes go through.
    pub(crate) async fn connection(&mut self) -> DbResult<&mut SqliteConnection> {
        if let Some(tx) = self.tx.as_mut() {
            return Ok(&mut **tx);
        }
        if self.conn.is_none() {
            let conn = guard(&self.cancel, self.pool.acquire()).await?;
            self.conn = Some(conn);
        }
        match self.conn.as_mut() {
            Some(conn) => Ok(&mut **conn),
            None => Err(DbError::Internal("connection not acquired".into())),
        }
    }

    /// Start a transaction. A second call while one is active is a no-op.
    pub async fn begin_transaction(&mut self) -> DbResult<()> {
        if self.tx.is_some() {
            warn!("Transaction already active on this unit of work; ignoring begin");
            return Ok(());
        }

        // Hand the autocommit connection back so a single-connection pool can
        // reuse it for the transaction.
        self.conn = None;

        let tx = guard(&self.cancel, self.pool.begin()).await?;
        self.tx = Some(tx);
        debug!("Transaction started");
        Ok(())
    }

    /// Apply staged writes to the active executor and return how many ran.
    ///
    /// The queue is drained whether or not the flush succeeds.
    pub async fn save_changes(&mut self) -> DbResult<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let writes = std::mem::take(&mut self.pending);
        let cancel = self.cancel.clone();
        let conn = self.connection().await?;
        apply(conn, &cancel, writes).await
    }

    /// Flush staged writes and commit the active transaction.
    ///
    /// If the flush or the commit fails the transaction is rolled back before
    /// the error is returned. Without an active transaction this only flushes.
    pub async fn commit(&mut self) -> DbResult<()> {
        let Some(mut tx) = self.tx.take() else {
            debug!("Commit without an active transaction; flushing pending writes");
            self.save_changes().await?;
            return Ok(());
        };

        let writes = std::mem::take(&mut self.pending);
        let count = writes.len();
        if let Err(e) = apply(&mut tx, &self.cancel, writes).await {
            if let Err(rollback_err) = tx.rollback().await {
                error!(error = %rollback_err, "Rollback after failed flush also failed");
            }
            return Err(e);
        }

        // A failed commit drops the transaction, which rolls it back.
        if let Err(e) = tx.commit().await {
            error!(error = %e, "Commit failed; transaction rolled back");
            return Err(e.into());
        }

        debug!(writes = count, "Transaction committed");
        Ok(())
    }

    /// Discard the active transaction and any staged writes.
    /// No-op without an active transaction.
    pub async fn rollback(&mut self) -> DbResult<()> {
        let Some(tx) = self.tx.take() else {
            debug!("Rollback without an active transaction; nothing to do");
            return Ok(());
        };

        let discarded = self.pending.len();
        self.pending.clear();
        tx.rollback().await?;
        debug!(discarded, "Transaction rolled back");
        Ok(())
    }

    /// Flush staged writes outside of any transaction. Each statement
    /// autocommits on its own.
    pub async fn complete(&mut self) -> DbResult<usize> {
        if self.tx.is_some() {
            warn!("complete() called inside a transaction; writes join the transaction");
        }
        self.save_changes().await
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(
                pending = self.pending.len(),
                "Unit of work dropped with an open transaction; rolling back"
            );
        } else if !self.pending.is_empty() {
            warn!(
                pending = self.pending.len(),
                "Unit of work dropped with unsaved writes; discarding"
            );
        }
    }
}
