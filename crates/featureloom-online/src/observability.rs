//! Online serving metrics
//!
//! Thin helpers over the `metrics` facade. Nothing is exported unless a
//! recorder is installed; the feature server installs a Prometheus one.

use featureloom_core::WriteSummary;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Feature cells written to an online store
pub const ONLINE_ROWS_WRITTEN: &str = "featureloom_online_cells_written_total";

/// Writes dropped because a value with a newer or equal event time was stored
pub const ONLINE_STALE_WRITES: &str = "featureloom_online_stale_writes_total";

/// Online read latency in seconds
pub const ONLINE_READ_DURATION: &str = "featureloom_online_read_duration_seconds";

/// Rows pulled from offline sources by materialization
pub const MATERIALIZED_ROWS: &str = "featureloom_materialized_rows_total";

/// Materialization run duration in seconds
pub const MATERIALIZATION_DURATION: &str = "featureloom_materialization_duration_seconds";

/// End-to-end online feature retrieval latency in seconds
pub const RETRIEVAL_DURATION: &str = "featureloom_retrieval_duration_seconds";

/// Entity rows served by online retrieval
pub const RETRIEVAL_ENTITY_ROWS: &str = "featureloom_retrieval_entity_rows_total";

/// Registers metric descriptions; call once after installing a recorder
pub fn register_metrics() {
    describe_counter!(ONLINE_ROWS_WRITTEN, "Feature cells written to the online store");
    describe_counter!(ONLINE_STALE_WRITES, "Online writes skipped as not newer by event time");
    describe_histogram!(ONLINE_READ_DURATION, "Online store read latency in seconds");
    describe_counter!(MATERIALIZED_ROWS, "Rows materialized from offline sources");
    describe_histogram!(MATERIALIZATION_DURATION, "Materialization run duration in seconds");
    describe_histogram!(RETRIEVAL_DURATION, "Online feature retrieval latency in seconds");
    describe_counter!(RETRIEVAL_ENTITY_ROWS, "Entity rows served by online retrieval");
}

pub fn record_online_write(store: &'static str, feature_view: &str, summary: WriteSummary) {
    let labels = [("store", store.to_string()), ("feature_view", feature_view.to_string())];
    counter!(ONLINE_ROWS_WRITTEN, &labels).increment(summary.written as u64);
    if summary.skipped_stale > 0 {
        counter!(ONLINE_STALE_WRITES, &labels).increment(summary.skipped_stale as u64);
    }
}

pub fn record_online_read(store: &'static str, feature_view: &str, elapsed: Duration) {
    histogram!(
        ONLINE_READ_DURATION,
        "store" => store,
        "feature_view" => feature_view.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_materialization(feature_view: &str, rows: usize, elapsed: Duration) {
    let labels = [("feature_view", feature_view.to_string())];
    counter!(MATERIALIZED_ROWS, &labels).increment(rows as u64);
    histogram!(MATERIALIZATION_DURATION, &labels).record(elapsed.as_secs_f64());
}

pub fn record_retrieval(project: &str, entity_rows: usize, elapsed: Duration, ok: bool) {
    let labels = [
        ("project", project.to_string()),
        ("status", if ok { "ok" } else { "error" }.to_string()),
    ];
    histogram!(RETRIEVAL_DURATION, &labels).record(elapsed.as_secs_f64());
    if ok {
        counter!(RETRIEVAL_ENTITY_ROWS, &labels).increment(entity_rows as u64);
    }
}
