//! Observability: structured logging and metrics.
//!
//! - Structured logging with configurable formats (pretty, compact, JSON)
//! - Prometheus counters and histograms for lifecycle, retention and jobs

pub mod metrics;
mod tracing_init;

pub use tracing_init::*;
