use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, sqlite::SqliteRow};
use uuid::Uuid;

use super::{
    attachments,
    common::{MAX_IDS_PER_STATEMENT, parse_uuid, placeholders},
};
use crate::{
    db::{
        error::DbResult,
        unit_of_work::{PendingWrite, UnitOfWork, guard},
    },
    models::{ExpiredMeeting, Meeting},
};

const MEETING_COLUMNS: &str = "id, name, description, start_at, end_at, organizer_id, is_canceled, canceled_at, created_at";

/// Meeting repository bound to a unit of work.
pub struct MeetingRepo<'a> {
    uow: &'a mut UnitOfWork,
}

impl<'a> MeetingRepo<'a> {
    pub(crate) fn new(uow: &'a mut UnitOfWork) -> Self {
        Self { uow }
    }

    pub async fn get(&mut self, id: Uuid) -> DbResult<Option<Meeting>> {
        let cancel = self.uow.cancellation().clone();
        let conn = self.uow.connection().await?;
        let query = format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE id = ?");
        let row = guard(
            &cancel,
            sqlx::query(&query)
                .bind(id.to_string())
                .fetch_optional(conn),
        )
        .await?;

        row.as_ref().map(row_to_meeting).transpose()
    }

    /// Meetings the user takes part in, soonest first.
    pub async fn list_for_user(&mut self, user_id: Uuid) -> DbResult<Vec<Meeting>> {
        let cancel = self.uow.cancellation().clone();
        let conn = self.uow.connection().await?;
        let rows = guard(
            &cancel,
            sqlx::query(
                r#"
                SELECT m.id, m.name, m.description, m.start_at, m.end_at, m.organizer_id,
                       m.is_canceled, m.canceled_at, m.created_at
                FROM meetings m
                JOIN participants p ON p.meeting_id = m.id
                WHERE p.user_id = ?
                ORDER BY m.start_at, m.id
                "#,
            )
            .bind(user_id.to_string())
            .fetch_all(conn),
        )
        .await?;

        rows.iter().map(row_to_meeting).collect()
    }

    /// Canceled meetings whose `canceled_at` is strictly before `cutoff`,
    /// oldest first, with their attachments eagerly loaded.
    pub async fn list_expired(
        &mut self,
        cutoff: DateTime<Utc>,
        limit: Option<u32>,
    ) -> DbResult<Vec<ExpiredMeeting>> {
        let cancel = self.uow.cancellation().clone();
        let conn = self.uow.connection().await?;
        let query = format!(
            r#"
            SELECT {MEETING_COLUMNS}
            FROM meetings
            WHERE is_canceled = 1 AND canceled_at IS NOT NULL AND canceled_at < ?
            ORDER BY canceled_at, id
            LIMIT ?
            "#
        );
        let rows = guard(
            &cancel,
            sqlx::query(&query)
                .bind(cutoff)
                // SQLite treats a negative LIMIT as unbounded
                .bind(limit.map(i64::from).unwrap_or(-1))
                .fetch_all(&mut *conn),
        )
        .await?;

        let meetings = rows
            .iter()
            .map(row_to_meeting)
            .collect::<DbResult<Vec<_>>>()?;
        if meetings.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = meetings.iter().map(|m| m.id).collect();
        let mut by_meeting: HashMap<Uuid, Vec<_>> = HashMap::new();
        for attachment in attachments::select_for_meetings(conn, &cancel, &ids).await? {
            by_meeting
                .entry(attachment.meeting_id)
                .or_default()
                .push(attachment);
        }

        Ok(meetings
            .into_iter()
            .map(|meeting| ExpiredMeeting {
                attachments: by_meeting.remove(&meeting.id).unwrap_or_default(),
                meeting,
            })
            .collect())
    }

    pub fn add(&mut self, meeting: Meeting) {
        self.uow.stage(PendingWrite::InsertMeeting(meeting));
    }

    pub fn update(&mut self, meeting: Meeting) {
        self.uow.stage(PendingWrite::UpdateMeeting(meeting));
    }

    /// Delete many meetings in bulk. Child rows must already be gone.
    pub fn remove_range(&mut self, ids: Vec<Uuid>) {
        if !ids.is_empty() {
            self.uow.stage(PendingWrite::DeleteMeetings(ids));
        }
    }
}

fn row_to_meeting(row: &SqliteRow) -> DbResult<Meeting> {
    Ok(Meeting {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        name: row.get("name"),
        description: row.get("description"),
        start_at: row.get("start_at"),
        end_at: row.get("end_at"),
        organizer_id: parse_uuid(&row.get::<String, _>("organizer_id"))?,
        is_canceled: row.get("is_canceled"),
        canceled_at: row.get("canceled_at"),
        created_at: row.get("created_at"),
    })
}

pub(crate) async fn insert(conn: &mut SqliteConnection, m: &Meeting) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO meetings (id, name, description, start_at, end_at, organizer_id, is_canceled, canceled_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(m.id.to_string())
    .bind(&m.name)
    .bind(&m.description)
    .bind(m.start_at)
    .bind(m.end_at)
    .bind(m.organizer_id.to_string())
    .bind(m.is_canceled)
    .bind(m.canceled_at)
    .bind(m.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn update(conn: &mut SqliteConnection, m: &Meeting) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE meetings
        SET name = ?, description = ?, start_at = ?, end_at = ?, is_canceled = ?, canceled_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&m.name)
    .bind(&m.description)
    .bind(m.start_at)
    .bind(m.end_at)
    .bind(m.is_canceled)
    .bind(m.canceled_at)
    .bind(m.id.to_string())
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn delete_many(
    conn: &mut SqliteConnection,
    ids: &[Uuid],
) -> Result<(), sqlx::Error> {
    for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
        let query = format!(
            "DELETE FROM meetings WHERE id IN ({})",
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
