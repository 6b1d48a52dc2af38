//! Health Check API Handler
//!
//! Reports runtime reachability and active runner count for monitoring.

use axum::{Json, extract::State, http::StatusCode};
use drydock_core::dto::runner::{HealthReport, HealthStatus};
use std::sync::Arc;

use crate::api::AppState;

/// GET /health
/// `503` while the service is degraded
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthReport>) {
    let report = state.service.health().await;

    let status = match report.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => {
            tracing::warn!("Health check degraded: {}", report.problems.join("; "));
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    (status, Json(report))
}
