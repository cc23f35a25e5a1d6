//! Retention cleanup for canceled meetings.
//!
//! Each pass:
//! 1. Selects meetings canceled before `now - threshold_days`, with their
//!    attachments
//! 2. Deletes each attachment's blob and row through the attachment service,
//!    acting as the meeting's organizer
//! 3. Deletes the participant rows of those meetings
//! 4. Deletes the meeting rows
//!
//! Relational deletes commit atomically per batch (or per meeting, with
//! `failure_scope = "meeting"`). Blob deletes cannot be rolled back: a failed
//! pass may leave rows whose blobs are already gone, and the next pass
//! removes them, since deleting a missing blob succeeds.

mod cleanup;

pub use cleanup::{RetentionCleanupJob, RetentionRunResult};
