//! Handlers for the bridge's own endpoints.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bridge_core::UsageSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::{
    health::{HealthResponse, LivenessResponse},
    state::AppState,
};

/// `/usage` query string
#[derive(Debug, Default, Deserialize)]
pub struct UsageQuery {
    /// `true` resets the counters
    #[serde(default)]
    pub reset: Option<String>,
}

/// Body returned after a usage reset
#[derive(Debug, Serialize, Deserialize)]
pub struct UsageResetResponse {
    /// Confirmation message
    pub message: String,
    /// Fresh snapshot after the reset
    pub usage: UsageSnapshot,
}

fn whole_seconds(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs())
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.status();
    let body = HealthResponse {
        status,
        uptime: humantime::format_duration(whole_seconds(state.health.uptime())).to_string(),
        requests: state.metrics.requests_total(),
        upstream_healthy: state.health.is_upstream_healthy(),
    };
    let code = StatusCode::from_u16(status.http_status_code()).unwrap_or(StatusCode::OK);
    (code, Json(body))
}

/// Liveness check endpoint
pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse::default())
}

/// Readiness check endpoint
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let readiness = state.health.readiness();
    let code = if readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(readiness))
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.gather(),
    )
}

/// Usage snapshot, or a reset with `?reset=true`
pub async fn usage(State(state): State<AppState>, Query(query): Query<UsageQuery>) -> Response {
    if query.reset.as_deref() == Some("true") {
        return reset(&state).into_response();
    }
    Json(state.usage.snapshot()).into_response()
}

/// Reset the usage counters
pub async fn reset_usage(State(state): State<AppState>) -> Json<UsageResetResponse> {
    reset(&state)
}

fn reset(state: &AppState) -> Json<UsageResetResponse> {
    state.usage.reset();
    info!("Usage statistics reset");
    Json(UsageResetResponse {
        message: "usage statistics reset".to_string(),
        usage: state.usage.snapshot(),
    })
}
