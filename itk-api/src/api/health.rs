//! Health check endpoint
//!
//! Reports uptime and whether the rendering backend answers.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" when the backend answers, "degraded" otherwise
    pub status: String,
    /// "connected" or "unreachable"
    pub backend: String,
    /// Module name ("itk-api")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Backend probe error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /health
///
/// Always 200; a down backend shows up as `degraded`.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let probe = state.executor.pipeline().backend.probe().await;
    let (status, backend, error) = match probe {
        Ok(()) => ("ok", "connected", None),
        Err(e) => ("degraded", "unreachable", Some(e.to_string())),
    };

    Json(HealthResponse {
        status: status.to_string(),
        backend: backend.to_string(),
        module: "itk-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
