//! Metrics instrumentation for mirror-engine.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the host
//! application picks the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `mirror_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `backend`: primary, secondary
//! - `operation`: get, exists, put, delete, append, increment,
//!   mutate_row, check_and_mutate, batch, scan
//! - `status`: success, error
//! - `outcome` (verification): match, mismatch, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record one backend operation with its status.
pub fn record_operation(backend: &'static str, operation: &'static str, status: &'static str) {
    counter!(
        "mirror_engine_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// Record backend operation latency.
pub fn record_latency(backend: &'static str, operation: &'static str, duration: Duration) {
    histogram!(
        "mirror_engine_operation_seconds",
        "backend" => backend,
        "operation" => operation
    )
    .record(duration.as_secs_f64());
}

/// Record the outcome of one read verification.
pub fn record_read_verification(operation: &'static str, outcome: &'static str) {
    counter!(
        "mirror_engine_read_verifications_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a detected mismatch between primary and secondary results.
pub fn record_mismatch(operation: &'static str) {
    counter!(
        "mirror_engine_mismatches_total",
        "operation" => operation
    )
    .increment(1);
}

/// Record a secondary write handed to the write-error sink.
pub fn record_write_error(kind: &'static str, operations: usize) {
    counter!(
        "mirror_engine_write_errors_total",
        "kind" => kind
    )
    .increment(operations as u64);
}

/// Record a flow-controller denial.
pub fn record_flow_denial(kind: &'static str) {
    counter!(
        "mirror_engine_flow_denials_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record a scheduled secondary submission.
pub fn record_secondary_scheduled(operation: &'static str) {
    counter!(
        "mirror_engine_secondary_scheduled_total",
        "operation" => operation
    )
    .increment(1);
}

/// Set the number of outstanding asynchronous operations (secondary work
/// plus verifications).
pub fn set_outstanding_operations(count: usize) {
    gauge!("mirror_engine_outstanding_operations").set(count as f64);
}

/// Record a scanner whose verification was disabled after an admission
/// denial broke lockstep with the secondary.
pub fn record_scanner_verification_disabled() {
    counter!("mirror_engine_scanner_verification_disabled_total").increment(1);
}

/// Record rows delivered by a mirroring scanner.
pub fn record_scanner_rows(count: u64) {
    counter!("mirror_engine_scanner_rows_total").increment(count);
}

/// Record batch size per backend.
pub fn record_batch_size(backend: &'static str, count: usize) {
    histogram!(
        "mirror_engine_batch_size",
        "backend" => backend
    )
    .record(count as f64);
}

/// A timing guard that records latency on drop.
pub struct LatencyTimer {
    backend: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    #[must_use]
    pub fn new(backend: &'static str, operation: &'static str) -> Self {
        Self { backend, operation, start: Instant::now() }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.backend, self.operation, self.start.elapsed());
    }
}
