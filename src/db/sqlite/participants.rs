use sqlx::{Row, SqliteConnection, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{MAX_IDS_PER_STATEMENT, parse_uuid, placeholders};
use crate::{
    db::{
        error::{DbError, DbResult},
        unit_of_work::{PendingWrite, UnitOfWork, guard},
    },
    models::{Participant, ParticipantRole},
};

/// Participant repository bound to a unit of work.
pub struct ParticipantRepo<'a> {
    uow: &'a mut UnitOfWork,
}

impl<'a> ParticipantRepo<'a> {
    pub(crate) fn new(uow: &'a mut UnitOfWork) -> Self {
        Self { uow }
    }

    pub async fn list(&mut self, meeting_id: Uuid) -> DbResult<Vec<Participant>> {
        let cancel = self.uow.cancellation().clone();
        let conn = self.uow.connection().await?;
        let rows = guard(
            &cancel,
            sqlx::query(
                r#"
                SELECT meeting_id, user_id, role, added_at
                FROM participants
                WHERE meeting_id = ?
                ORDER BY added_at, user_id
                "#,
            )
            .bind(meeting_id.to_string())
            .fetch_all(conn),
        )
        .await?;

        rows.iter().map(row_to_participant).collect()
    }

    pub async fn get(&mut self, meeting_id: Uuid, user_id: Uuid) -> DbResult<Option<Participant>> {
        let cancel = self.uow.cancellation().clone();
        let conn = self.uow.connection().await?;
        let row = guard(
            &cancel,
            sqlx::query(
                r#"
                SELECT meeting_id, user_id, role, added_at
                FROM participants
                WHERE meeting_id = ? AND user_id = ?
                "#,
            )
            .bind(meeting_id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(conn),
        )
        .await?;

        row.as_ref().map(row_to_participant).transpose()
    }

    pub async fn exists(&mut self, meeting_id: Uuid, user_id: Uuid) -> DbResult<bool> {
        let cancel = self.uow.cancellation().clone();
        let conn = self.uow.connection().await?;
        let row = guard(
            &cancel,
            sqlx::query(
                "SELECT EXISTS(SELECT 1 FROM participants WHERE meeting_id = ? AND user_id = ?) AS present",
            )
            .bind(meeting_id.to_string())
            .bind(user_id.to_string())
            .fetch_one(conn),
        )
        .await?;

        Ok(row.get::<i64, _>("present") != 0)
    }

    pub fn add(&mut self, participant: Participant) {
        self.uow.stage(PendingWrite::InsertParticipant(participant));
    }

    pub fn remove(&mut self, meeting_id: Uuid, user_id: Uuid) {
        self.uow.stage(PendingWrite::DeleteParticipant {
            meeting_id,
            user_id,
        });
    }

    /// Delete every participant row of the given meetings.
    pub fn remove_for_meetings(&mut self, meeting_ids: Vec<Uuid>) {
        if !meeting_ids.is_empty() {
            self.uow
                .stage(PendingWrite::DeleteParticipantsOfMeetings(meeting_ids));
        }
    }
}

fn row_to_participant(row: &SqliteRow) -> DbResult<Participant> {
    let role: String = row.get("role");
    Ok(Participant {
        meeting_id: parse_uuid(&row.get::<String, _>("meeting_id"))?,
        user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
        role: role.parse().map_err(DbError::Internal)?,
        added_at: row.get("added_at"),
    })
}

pub(crate) async fn insert(
    conn: &mut SqliteConnection,
    p: &Participant,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO participants (meeting_id, user_id, role, added_at) VALUES (?, ?, ?, ?)",
    )
    .bind(p.meeting_id.to_string())
    .bind(p.user_id.to_string())
    .bind(p.role.as_str())
    .bind(p.added_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn delete(
    conn: &mut SqliteConnection,
    meeting_id: Uuid,
    user_id: Uuid,
) -> Result<(), sqlx::Error> {
    // The organizer row is never removed through this path.
    sqlx::query("DELETE FROM participants WHERE meeting_id = ? AND user_id = ? AND role <> ?")
        .bind(meeting_id.to_string())
        .bind(user_id.to_string())
        .bind(ParticipantRole::Organizer.as_str())
        .execute(conn)
        .await?;
    Ok(())
}

pub(crate) async fn delete_for_meetings(
    conn: &mut SqliteConnection,
    meeting_ids: &[Uuid],
) -> Result<(), sqlx::Error> {
    for chunk in meeting_ids.chunks(MAX_IDS_PER_STATEMENT) {
        let query = format!(
            "DELETE FROM participants WHERE meeting_id IN ({})",
            placeholders(chunk.len())
        );
        let mut q = sqlx::query(&query);
        for id in chunk {
            q = q.bind(id.to_string());
        }
        q.execute(&mut *conn).await?;
    }
    Ok(())
}
