//! itk-api library interface
//!
//! Exposes the job orchestration core and the HTTP router for the server
//! binary and integration tests.

pub mod api;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::trace::TraceLayer;

use crate::services::JobExecutor;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Job submission, execution, and lookup
    pub executor: JobExecutor,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(executor: JobExecutor) -> Self {
        Self {
            executor,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::infer_routes())
        .merge(api::job_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
