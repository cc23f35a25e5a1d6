//! Meeting lifecycle service.
//!
//! Meetings, participants and attachment metadata live in SQLite; attachment
//! bytes live in an object store. Services coordinate the two, and a
//! recurring retention job purges canceled meetings once they pass a
//! configurable age.

pub mod app;
pub mod config;
pub mod db;
pub mod jobs;
pub mod models;
pub mod observability;
pub mod retention;
pub mod services;

#[cfg(test)]
mod tests;

pub use app::{App, AppError};
