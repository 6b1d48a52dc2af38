//! Runner API Handlers
//!
//! HTTP endpoints for creating, inspecting and destroying ephemeral runners.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use drydock_core::dto::runner::{
    CleanupReport, CreateRunners, CreatedRunner, DeleteOutcome, RunnerLogs, RunnerSummary,
};
use std::sync::Arc;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::runner::DEFAULT_LOG_TAIL;

// =============================================================================
// Runner Lifecycle
// =============================================================================

/// POST /runners/create
/// Registers the requested runners and starts provisioning them
pub async fn create_runners(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateRunners>, JsonRejection>,
) -> ApiResult<Json<Vec<CreatedRunner>>> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    tracing::info!(
        "Create request: {} runner(s) for {} {}",
        req.count,
        req.scope,
        req.scope_name
    );

    let created = state.service.create(req).await?;
    Ok(Json(created))
}

/// DELETE /runners/{id}
/// Destroys a runner and its container
pub async fn delete_runner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteOutcome>> {
    tracing::info!("Delete request for runner {}", id);

    let outcome = state.service.delete(&id).await?;
    Ok(Json(outcome))
}

/// POST /runners/cleanup
/// Runs one cleanup pass
pub async fn cleanup_runners(State(state): State<Arc<AppState>>) -> Json<CleanupReport> {
    let report = state.service.cleanup().await;
    tracing::info!("Cleanup removed {} runner(s)", report.cleaned_count);
    Json(report)
}

// =============================================================================
// Runner Query Endpoints
// =============================================================================

/// GET /runners
pub async fn list_runners(State(state): State<Arc<AppState>>) -> Json<Vec<RunnerSummary>> {
    tracing::debug!("Listing all runners");
    Json(state.service.list())
}

/// GET /runners/{id}/status
pub async fn get_runner_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunnerSummary>> {
    tracing::debug!("Getting status of runner {}", id);

    let summary = state.service.get(&id)?;
    Ok(Json(summary))
}

/// GET /runners/{id}/logs
/// Recent container output; `id` may also be a runner name
pub async fn get_runner_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunnerLogs>> {
    tracing::debug!("Getting logs of runner {}", id);

    let logs = state.service.logs(&id, DEFAULT_LOG_TAIL).await?;
    Ok(Json(logs))
}
