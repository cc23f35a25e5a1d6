use sqlx::{Row, SqliteConnection, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{MAX_IDS_PER_STATEMENT, parse_uuid, placeholders};
use crate::{
    db::{
        error::DbResult,
        unit_of_work::{PendingWrite, UnitOfWork, guard},
    },
    models::{Role, User, normalize_email},
};

/// User repository bound to a unit of work.
pub struct UserRepo<'a> {
    uow: &'a mut UnitOfWork,
}

impl<'a> UserRepo<'a> {
    pub(crate) fn new(uow: &'a mut UnitOfWork) -> Self {
        Self { uow }
    }

    pub async fn get(&mut self, id: Uuid) -> DbResult<Option<User>> {
        let cancel = self.uow.cancellation().clone();
        let conn = self.uow.connection().await?;
        let row = guard(
            &cancel,
            sqlx::query("SELECT id, email, display_name, created_at FROM users WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(conn),
        )
        .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn find_by_email(&mut self, email: &str) -> DbResult<Option<User>> {
        let cancel = self.uow.cancellation().clone();
        let conn = self.uow.connection().await?;
        let row = guard(
            &cancel,
            sqlx::query("SELECT id, email, display_name, created_at FROM users WHERE email = ?")
                .bind(normalize_email(email))
                .fetch_optional(conn),
        )
        .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    /// Resolve many emails at once. Unknown emails are absent from the result.
    pub async fn find_by_emails(&mut self, emails: &[String]) -> DbResult<Vec<User>> {
        let mut normalized: Vec<String> = emails.iter().map(|e| normalize_email(e)).collect();
        normalized.sort();
        normalized.dedup();
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        let cancel = self.uow.cancellation().clone();
        let conn = self.uow.connection().await?;
        let mut users = Vec::with_capacity(normalized.len());
        for chunk in normalized.chunks(MAX_IDS_PER_STATEMENT) {
            let query = format!(
                "SELECT id, email, display_name, created_at FROM users WHERE email IN ({}) ORDER BY email",
                placeholders(chunk.len())
            );
            let mut q = sqlx::query(&query);
            for email in chunk {
                q = q.bind(email);
            }
            let rows = guard(&cancel, q.fetch_all(&mut *conn)).await?;
            for row in &rows {
                users.push(row_to_user(row)?);
            }
        }
        Ok(users)
    }

    pub async fn roles_for(&mut self, user_id: Uuid) -> DbResult<Vec<Role>> {
        let cancel = self.uow.cancellation().clone();
        let conn = self.uow.connection().await?;
        let rows = guard(
            &cancel,
            sqlx::query(
                r#"
                SELECT r.id, r.name
                FROM roles r
                JOIN user_roles ur ON ur.role_id = r.id
                WHERE ur.user_id = ?
                ORDER BY r.name
                "#,
            )
            .bind(user_id.to_string())
            .fetch_all(conn),
        )
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Role {
                    id: parse_uuid(&row.get::<String, _>("id"))?,
                    name: row.get("name"),
                })
            })
            .collect()
    }

    pub fn add(&mut self, user: User) {
        self.uow.stage(PendingWrite::InsertUser(user));
    }
}

fn row_to_user(row: &SqliteRow) -> DbResult<User> {
    Ok(User {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        email: row.get("email"),
        display_name: row.get("display_name"),
        created_at: row.get("created_at"),
    })
}

pub(crate) async fn insert(conn: &mut SqliteConnection, u: &User) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO users (id, email, display_name, created_at) VALUES (?, ?, ?, ?)")
        .bind(u.id.to_string())
        .bind(normalize_email(&u.email))
        .bind(&u.display_name)
        .bind(u.created_at)
        .execute(conn)
        .await?;
    Ok(())
}
