use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::DbResult,
        unit_of_work::{PendingWrite, UnitOfWork, guard},
    },
    models::Role,
};

/// Application role repository bound to a unit of work.
pub struct RoleRepo<'a> {
    uow: &'a mut UnitOfWork,
}

impl<'a> RoleRepo<'a> {
    pub(crate) fn new(uow: &'a mut UnitOfWork) -> Self {
        Self { uow }
    }

    /// Look up a role by exact name (`Admin`, `Member`).
    pub async fn get_by_name(&mut self, name: &str) -> DbResult<Option<Role>> {
        let cancel = self.uow.cancellation().clone();
        let conn = self.uow.connection().await?;
        let row = guard(
            &cancel,
            sqlx::query("SELECT id, name FROM roles WHERE name = ?")
                .bind(name)
                .fetch_optional(conn),
        )
        .await?;

        row.map(|row| {
            Ok(Role {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                name: row.get("name"),
            })
        })
        .transpose()
    }

    pub fn assign(&mut self, user_id: Uuid, role_id: Uuid) {
        self.uow.stage(PendingWrite::AssignRole { user_id, role_id });
    }
}

pub(crate) async fn assign(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    role_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?, ?)")
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .execute(conn)
        .await?;
    Ok(())
}
