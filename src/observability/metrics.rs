//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_attempts_total` (counter): attempts by operation, outcome
//! - `resilience_operation_duration_seconds` (histogram): whole-call latency
//! - `resilience_slow_warnings_total` (counter): slow-operation warnings
//! - `resilience_cancellations_total` (counter): successful cancellations
//! - `resilience_orphaned_workers` (gauge): sync workers running past deadline

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

/// Record the outcome of a single attempt ("success", "error", "timeout").
pub fn record_attempt(operation: &str, outcome: &'static str) {
    counter!(
        "resilience_attempts_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a finished call, including every retry and sleep.
pub fn record_operation(
    operation: &str,
    strategy: &'static str,
    success: bool,
    duration_secs: f64,
) {
    histogram!(
        "resilience_operation_duration_seconds",
        "operation" => operation.to_string(),
        "strategy" => strategy,
        "success" => if success { "true" } else { "false" }
    )
    .record(duration_secs);
}

pub fn record_slow_warning(operation: &str) {
    counter!("resilience_slow_warnings_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_cancellation() {
    counter!("resilience_cancellations_total").increment(1);
}

/// A worker was left running past its deadline.
pub fn record_orphan_started() {
    gauge!("resilience_orphaned_workers").increment(1.0);
}

/// An orphaned worker returned.
pub fn record_orphan_returned() {
    gauge!("resilience_orphaned_workers").decrement(1.0);
}
