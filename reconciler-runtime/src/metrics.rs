//! Prometheus metrics for reconciliation ticks
//!
//! This module defines metrics for tracking tick outcomes and the partitions
//! each tick requests, skips and discards.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

lazy_static! {
    /// Total number of ticks
    ///
    /// Labels:
    /// - outcome: "completed", "skipped" (previous tick in flight), "failed"
    pub static ref TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "reconciler_ticks_total",
        "Total number of reconciliation ticks",
        &["outcome"]
    )
    .expect("reconciler_ticks_total metric registration");

    /// Duration of completed ticks in seconds, snapshot loading included
    ///
    /// Buckets: 5ms to 60s
    pub static ref TICK_DURATION: Histogram = register_histogram!(
        "reconciler_tick_duration_seconds",
        "Duration of reconciliation ticks",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("reconciler_tick_duration_seconds metric registration");

    /// Partitions classified by a tick
    ///
    /// Labels:
    /// - decision: "requested", "skipped", "discarded"
    pub static ref PARTITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "reconciler_partitions_total",
        "Asset partitions requested, skipped or discarded by reconciliation",
        &["decision"]
    )
    .expect("reconciler_partitions_total metric registration");

    /// Run requests handed to the launcher
    pub static ref RUN_REQUESTS_TOTAL: IntCounter = register_int_counter!(
        "reconciler_run_requests_total",
        "Total number of run requests emitted"
    )
    .expect("reconciler_run_requests_total metric registration");

    /// Assets whose evaluation failed and whose decision was dropped
    ///
    /// Labels:
    /// - kind: "unknown_asset", "invalid_history", "subset"
    pub static ref EVALUATION_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "reconciler_evaluation_errors_total",
        "Total number of asset evaluation failures",
        &["kind"]
    )
    .expect("reconciler_evaluation_errors_total metric registration");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        // Accessing each metric panics if registration failed
        let _ = TICKS_TOTAL.with_label_values(&["completed"]);
        let _ = TICK_DURATION.get_sample_count();
        let _ = PARTITIONS_TOTAL.with_label_values(&["requested"]);
        let _ = RUN_REQUESTS_TOTAL.get();
        let _ = EVALUATION_ERRORS_TOTAL.with_label_values(&["invalid_history"]);
    }
}
