mod error;
pub mod sqlite;
pub mod unit_of_work;

#[cfg(test)]
pub mod tests;

use std::{str::FromStr, time::Duration};

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tokio_util::sync::CancellationToken;

pub use error::{DbError, DbResult};
pub use unit_of_work::{PendingWrite, UnitOfWork};

use crate::config::DatabaseConfig;

/// Handle to the relational store.
///
/// Cheap to clone; every [`UnitOfWork`] borrows a connection from the same pool.
#[derive(Clone)]
pub struct DbPool {
    pool: SqlitePool,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    pub fn from_sqlite(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        let options = if config.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(config.create_if_missing)
                .journal_mode(if config.wal_mode {
                    SqliteJournalMode::Wal
                } else {
                    SqliteJournalMode::Delete
                })
        }
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        // Every in-memory connection is its own database, so keep exactly one
        // and never recycle it.
        let mut pool_options = SqlitePoolOptions::new();
        let max_connections = if config.is_in_memory() {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
            1
        } else {
            config.max_connections
        };

        let pool = pool_options
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        tracing::debug!(path = %config.path, max_connections, "SQLite pool opened");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> DbResult<()> {
        tracing::info!("Running SQLite migrations");
        sqlx::migrate!("./migrations_sqlx/sqlite")
            .run(&self.pool)
            .await?;
        tracing::info!("SQLite migrations completed successfully");
        Ok(())
    }

    /// Open a unit of work whose await points observe `cancel`.
    pub fn unit_of_work(&self, cancel: CancellationToken) -> UnitOfWork {
        UnitOfWork::new(self.pool.clone(), cancel)
    }

    pub async fn health_check(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
