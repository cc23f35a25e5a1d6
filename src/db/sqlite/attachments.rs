use sqlx::{Row, SqliteConnection, sqlite::SqliteRow};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::common::{MAX_IDS_PER_STATEMENT, parse_uuid, placeholders};
use crate::{
    db::{
        error::DbResult,
        unit_of_work::{PendingWrite, UnitOfWork, guard},
    },
    models::{Attachment, AttachmentWithOrganizer},
};

const ATTACHMENT_COLUMNS: &str =
    "id, meeting_id, file_name, content_type, size_bytes, object_key, uploaded_by, uploaded_at";

/// Attachment metadata repository bound to a unit of work.
pub struct AttachmentRepo<'a> {
    uow: &'a mut UnitOfWork,
}

impl<'a> AttachmentRepo<'a> {
    pub(crate) fn new(uow: &'a mut UnitOfWork) -> Self {
        Self { uow }
    }

    pub async fn list(&mut self, meeting_id: Uuid) -> DbResult<Vec<Attachment>> {
        let cancel = self.uow.cancellation().clone();
        let conn = self.uow.connection().await?;
        select_for_meetings(conn, &cancel, &[meeting_id]).await
    }

    /// Look up an attachment of a meeting together with that meeting's organizer.
    pub async fn find_with_organizer(
        &mut self,
        meeting_id: Uuid,
        attachment_id: Uuid,
    ) -> DbResult<Option<AttachmentWithOrganizer>> {
        let cancel = self.uow.cancellation().clone();
        let conn = self.uow.connection().await?;
        let row = guard(
            &cancel,
            sqlx::query(
                r#"
                SELECT a.id, a.meeting_id, a.file_name, a.content_type, a.size_bytes,
                       a.object_key, a.uploaded_by, a.uploaded_at, m.organizer_id
                FROM attachments a
                JOIN meetings m ON m.id = a.meeting_id
                WHERE a.id = ? AND a.meeting_id = ?
                "#,
            )
            .bind(attachment_id.to_string())
            .bind(meeting_id.to_string())
            .fetch_optional(conn),
        )
        .await?;

        row.map(|row| {
            Ok(AttachmentWithOrganizer {
                attachment: row_to_attachment(&row)?,
                organizer_id: parse_uuid(&row.get::<String, _>("organizer_id"))?,
            })
        })
        .transpose()
    }

    pub fn add(&mut self, attachment: Attachment) {
        self.uow.stage(PendingWrite::InsertAttachment(attachment));
    }

    pub fn remove(&mut self, attachment_id: Uuid) {
        self.uow.stage(PendingWrite::DeleteAttachment(attachment_id));
    }
}

/// Attachments of the given meetings, ordered by upload time.
pub(crate) async fn select_for_meetings(
    conn: &mut SqliteConnection,
    cancel: &CancellationToken,
    meeting_ids: &[Uuid],
) -> DbResult<Vec<Attachment>> {
    let mut attachments = Vec::new();
    for chunk in meeting_ids.chunks(MAX_IDS_PER_STATEMENT) {
        let query = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE meeting_id IN ({}) ORDER BY uploaded_at, id",
            placeholders(chunk.len())
        );
        let mut q = sqlx::query(&query);
        for id in chunk {
            q = q.bind(id.to_string());
        }
        let rows = guard(cancel, q.fetch_all(&mut *conn)).await?;
        for row in &rows {
            attachments.push(row_to_attachment(row)?);
        }
    }
    Ok(attachments)
}

fn row_to_attachment(row: &SqliteRow) -> DbResult<Attachment> {
    Ok(Attachment {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        meeting_id: parse_uuid(&row.get::<String, _>("meeting_id"))?,
        file_name: row.get("file_name"),
        content_type: row.get("content_type"),
        size_bytes: row.get("size_bytes"),
        object_key: row.get("object_key"),
        uploaded_by: parse_uuid(&row.get::<String, _>("uploaded_by"))?,
        uploaded_at: row.get("uploaded_at"),
    })
}

pub(crate) async fn insert(conn: &mut SqliteConnection, a: &Attachment) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO attachments (id, meeting_id, file_name, content_type, size_bytes, object_key, uploaded_by, uploaded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(a.id.to_string())
    .bind(a.meeting_id.to_string())
    .bind(&a.file_name)
    .bind(&a.content_type)
    .bind(a.size_bytes)
    .bind(&a.object_key)
    .bind(a.uploaded_by.to_string())
    .bind(a.uploaded_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn delete(conn: &mut SqliteConnection, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM attachments WHERE id = ?")
        .bind(id.to_string())
        .execute(conn)
        .await?;
    Ok(())
}
