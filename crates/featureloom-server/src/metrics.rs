//! Prometheus exposition of the featureloom metrics
//!
//! Stores and retrieval record through the `metrics` facade; this module
//! installs the process-wide Prometheus recorder and serves `/metrics`.

use axum::{http::StatusCode, response::IntoResponse};
use featureloom::online::observability;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the global Prometheus recorder; later calls return the same handle
///
/// Returns `None` when another recorder was installed first, in which case
/// `/metrics` answers 503.
pub fn init_metrics() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                observability::register_metrics();
                info!("Prometheus metrics recorder initialized");
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "Failed to install Prometheus recorder, metrics disabled");
                None
            }
        })
        .clone()
}

pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned().flatten()
}

/// `GET /metrics`
pub async fn serve_metrics() -> impl IntoResponse {
    match prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            "Metrics not initialized".to_string(),
        ),
    }
}
