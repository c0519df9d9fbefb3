//! Run and node metrics.
//!
//! Recorded through the `metrics` facade. No recorder is installed here; the
//! embedding process decides where (or whether) they are exported.
//!
//! ## Metrics
//!
//! ### Counters
//! - `weft_runs_total` - Terminal and waiting run transitions by status and mode
//! - `weft_nodes_executed_total` - Node invocations by node_type and status
//! - `weft_runs_resumed_total` - Resumed runs
//!
//! ### Histograms
//! - `weft_node_duration_seconds` - Node invocation duration by node_type
//!
//! ### Gauges
//! - `weft_active_runs` - Runs currently being stepped

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a run reaching a resting state.
pub fn record_run(status: &str, mode: &str) {
    counter!(
        "weft_runs_total",
        "status" => status.to_string(),
        "mode" => mode.to_string()
    )
    .increment(1);
}

/// Record a resumed run.
pub fn record_resume() {
    counter!("weft_runs_resumed_total").increment(1);
}

/// Record a node invocation.
pub fn record_node_execution(node_type: &str, status: &str, duration: Duration) {
    counter!(
        "weft_nodes_executed_total",
        "node_type" => node_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        "weft_node_duration_seconds",
        "node_type" => node_type.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Increment active runs gauge.
pub fn inc_active_runs() {
    gauge!("weft_active_runs").increment(1.0);
}

/// Decrement active runs gauge.
pub fn dec_active_runs() {
    gauge!("weft_active_runs").decrement(1.0);
}
