//! Metric names and recording helpers over the `metrics` facade.
//!
//! Without an installed recorder these calls are no-ops.

use std::time::Duration;

use crate::accelerator::Accelerator;

pub const REQUESTS_TOTAL: &str = "snpe_rt_requests_total";
pub const REJECTED_TOTAL: &str = "snpe_rt_rejected_total";
pub const FALLBACKS_TOTAL: &str = "snpe_rt_accelerator_fallbacks_total";
pub const EXECUTION_MS: &str = "snpe_rt_execution_ms";
pub const QUEUE_DEPTH: &str = "snpe_rt_queue_depth";

/// Record a finished request; `status` is `ok`, `cancelled` or an error kind.
pub fn record_completion(status: &'static str, elapsed: Duration) {
    metrics::counter!(REQUESTS_TOTAL, "status" => status).increment(1);
    if status == "ok" {
        metrics::histogram!(EXECUTION_MS).record(elapsed.as_secs_f64() * 1000.0);
    }
}

/// Record a submission refused by the dispatcher.
pub fn record_rejection(reason: &'static str) {
    metrics::counter!(REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record an accelerator skipped while binding a session.
pub fn record_fallback(skipped: Accelerator) {
    metrics::counter!(FALLBACKS_TOTAL, "accelerator" => skipped.as_str()).increment(1);
}

pub fn record_queue_depth(depth: usize) {
    metrics::gauge!(QUEUE_DEPTH).set(depth as f64);
}
