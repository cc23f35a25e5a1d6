//! Database repository tests
//!
//! Each repository has a test module containing shared async test functions
//! that take a migrated [`DbPool`](crate::db::DbPool), wired to `#[tokio::test]`
//! through a `sqlite_test!` macro. All tests run against in-memory SQLite.
//!
//! ```bash
//! cargo test db::tests
//! ```

mod meetings;
mod participants;
mod unit_of_work;
mod users;
