//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod config;
pub mod error;
pub mod health;
pub mod runner;

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::service::RunnerService;

/// Shared state handed to every handler
pub struct AppState {
    pub service: Arc<RunnerService>,
    pub config: Arc<Config>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Runner endpoints
        .route("/runners", get(runner::list_runners))
        .route("/runners/create", post(runner::create_runners))
        .route("/runners/cleanup", post(runner::cleanup_runners))
        .route("/runners/{id}", delete(runner::delete_runner))
        .route("/runners/{id}/status", get(runner::get_runner_status))
        .route("/runners/{id}/logs", get(runner::get_runner_logs))
        // Configuration endpoints
        .route("/config/placeholders", get(config::list_placeholders))
        .route("/config/validate", get(config::validate_templates))
        .route("/config/info", get(config::config_info))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
