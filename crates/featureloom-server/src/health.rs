//! Health checks
//!
//! - `/health` - liveness (fast, always succeeds if the server is up)
//! - `/health/ready` - readiness: online store reachable and registry loadable

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Instant;

use crate::state::AppState;

/// Checks slower than this report `degraded`
const DEGRADED_LATENCY_MS: u64 = 1_000;

#[derive(Serialize)]
pub struct LivenessResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub online_store: ComponentHealth,
    pub registry: ComponentHealth,
}

/// Health status for a single component
#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentHealth {
    pub fn healthy(latency_ms: u64, details: serde_json::Value) -> Self {
        let status = if latency_ms > DEGRADED_LATENCY_MS {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        };
        Self {
            status,
            latency_ms: Some(latency_ms),
            message: (status == ComponentStatus::Degraded).then(|| "High latency".to_string()),
            details: Some(details),
        }
    }

    pub fn unhealthy(message: String) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            latency_ms: None,
            message: Some(message),
            details: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status != ComponentStatus::Unhealthy
    }
}

/// `GET /health`
///
/// ```json
/// { "status": "ok", "uptime_seconds": 123, "version": "0.1.0" }
/// ```
pub async fn liveness(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok".to_string(),
        uptime_seconds: state.uptime(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /health/ready`
///
/// 200 when every component is healthy or degraded, 503 otherwise.
pub async fn readiness(State(state): State<AppState>) -> Response {
    let online_store = check_online_store(&state).await;
    let registry = check_registry(&state).await;

    let ready = online_store.is_ok() && registry.is_ok();
    let response = ReadinessResponse {
        status: if ready { "ready" } else { "not_ready" }.to_string(),
        uptime_seconds: state.uptime(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            online_store,
            registry,
        },
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response)).into_response()
}

async fn check_online_store(state: &AppState) -> ComponentHealth {
    let online = state.store().online_store();
    let start = Instant::now();
    match online.health_check().await {
        Ok(()) => ComponentHealth::healthy(
            start.elapsed().as_millis() as u64,
            serde_json::json!({ "type": online.store_type() }),
        ),
        Err(e) => ComponentHealth::unhealthy(format!("Online store error: {}", e)),
    }
}

async fn check_registry(state: &AppState) -> ComponentHealth {
    let store = state.store();
    let start = Instant::now();
    match store.registry().snapshot(true).await {
        Ok(snapshot) => {
            let feature_views = snapshot
                .project(store.project())
                .map_or(0, |catalog| catalog.stored_views().count());
            ComponentHealth::healthy(
                start.elapsed().as_millis() as u64,
                serde_json::json!({
                    "version": snapshot.version,
                    "feature_view_count": feature_views,
                }),
            )
        }
        Err(e) => ComponentHealth::unhealthy(format!("Registry error: {}", e)),
    }
}
