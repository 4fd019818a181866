//! HTTP feature server for featureloom
//!
//! [`router`] builds the axum application over a shared
//! [`FeatureStore`](featureloom::FeatureStore); the binary in `main.rs`
//! wires it to configuration, tracing, the Prometheus recorder and graceful
//! shutdown.
//!
//! ```rust,ignore
//! let store = FeatureStore::open("feature_store.yaml").await?;
//! let app = featureloom_server::router(AppState::new(store), ServerLimits::default());
//! axum::serve(listener, app).await?;
//! ```

pub mod api;
pub mod error;
pub mod health;
pub mod metrics;
pub mod request_id;
pub mod shutdown;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub use state::AppState;

/// Resource limits applied to every request
#[derive(Debug, Clone, Copy)]
pub struct ServerLimits {
    /// Maximum request body size in bytes
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024,
            request_timeout: Duration::from_secs(60),
        }
    }
}

pub fn router(state: AppState, limits: ServerLimits) -> Router {
    Router::new()
        .route("/health", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/metrics", get(metrics::serve_metrics))
        .route("/get-online-features", post(api::get_online_features))
        .route("/push", post(api::push))
        .route("/write-to-online-store", post(api::write_to_online_store))
        .route("/materialize", post(api::materialize))
        .route("/materialize-incremental", post(api::materialize_incremental))
        .with_state(state)
        // Layers run bottom to top; the timeout wraps everything
        .layer(DefaultBodyLimit::max(limits.max_body_bytes))
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(limits.request_timeout))
}
