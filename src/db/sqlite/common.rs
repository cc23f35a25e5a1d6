use uuid::Uuid;

use crate::db::error::{DbError, DbResult};

/// SQLite caps bound parameters per statement; IN-lists are chunked to this size.
pub const MAX_IDS_PER_STATEMENT: usize = 500;

/// Parse a UUID string from the database, returning a DbError on failure
pub fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("Invalid UUID in database: {}", e)))
}

/// `?, ?, ?` for an IN-list of `n` parameters.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
