//! Service-level scenario tests.
//!
//! Each test runs the real services against a migrated in-memory SQLite
//! database, with doubles for the object store and the job dispatcher.
