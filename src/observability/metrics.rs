//! Prometheus metrics.
//!
//! Provides metrics for:
//! - Meeting lifecycle operations
//! - Attachment uploads and removals
//! - Retention cleanup runs
//! - Background job executions
//!
//! Every recording function is a no-op without the `prometheus` feature.

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

use crate::config::MetricsConfig;

/// Install the Prometheus recorder and its scrape listener.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let addr: std::net::SocketAddr = config
        .listen_addr
        .parse()
        .map_err(|e| MetricsError::Setup(format!("Invalid listen_addr: {}", e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.duration_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install()?;

    tracing::info!(%addr, "Prometheus metrics endpoint listening");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!("Metrics enabled in config but the 'prometheus' feature is not compiled in");
    }
    Ok(())
}

/// Convert millisecond buckets to seconds.
#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a meeting lifecycle operation.
///
/// # Arguments
/// * `operation` - "create", "update", "cancel", "add_participant", "remove_participant"
/// * `outcome` - "success", a failure name such as "not_authorized", or "error"
pub fn record_meeting_operation(operation: &str, outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "meeting_operations_total",
            "operation" => operation.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (operation, outcome);
    }
}

/// Record attachments written to the object store.
pub fn record_attachment_upload(backend: &str, count: u64, bytes: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("attachments_uploaded_total", "backend" => backend.to_string()).increment(count);
        counter!("attachments_uploaded_bytes_total", "backend" => backend.to_string())
            .increment(bytes);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (backend, count, bytes);
    }
}

/// Record an attachment removal.
pub fn record_attachment_removal(backend: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("attachments_removed_total", "backend" => backend.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = backend;
    }
}

/// Record rows deleted by the retention cleanup job.
///
/// # Arguments
/// * `table` - "meetings", "participants" or "attachments"
/// * `count` - The number of rows deleted
pub fn record_retention_deletion(table: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_deletions_total",
            "table" => table.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, count);
    }
}

/// Record a failed retention run (or failed meeting, in per-meeting mode).
pub fn record_retention_error(scope: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_errors_total",
            "scope" => scope.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = scope;
    }
}

/// Record a background job execution.
///
/// # Arguments
/// * `job` - The job kind, e.g. "meeting_reminder"
/// * `status` - "success" or "error"
/// * `duration_secs` - Wall-clock time of the execution
pub fn record_job_execution(job: &str, status: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "jobs_executed_total",
            "job" => job.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!("job_duration_seconds", "job" => job.to_string()).record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (job, status, duration_secs);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
