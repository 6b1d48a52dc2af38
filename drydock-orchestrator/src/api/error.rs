//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::OrchestratorError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    TooManyRequests(String),
    BadGateway(String),
    Unavailable(String),
    GatewayTimeout(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::BadGateway(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let message = err.to_string();
        match err {
            OrchestratorError::Validation(_) => ApiError::BadRequest(message),
            OrchestratorError::NotFound(_) | OrchestratorError::ScopeNotFound(_) => {
                ApiError::NotFound(message)
            }
            OrchestratorError::Auth(_) => ApiError::BadGateway(message),
            OrchestratorError::RateLimited { .. } => ApiError::TooManyRequests(message),
            OrchestratorError::Timeout(_) => ApiError::GatewayTimeout(message),
            OrchestratorError::RuntimeUnavailable(_) | OrchestratorError::ShuttingDown => {
                ApiError::Unavailable(message)
            }
            OrchestratorError::ImagePull(_)
            | OrchestratorError::Create(_)
            | OrchestratorError::Platform(_)
            | OrchestratorError::Runtime(_) => ApiError::InternalError(message),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
