//! Orchestrator error taxonomy
//!
//! Every component reports failures through [`OrchestratorError`]. Payloads are plain
//! strings so the error can be cloned and shared between coalesced credential waiters.

use drydock_github::ClientError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("platform rejected credentials: {0}")]
    Auth(String),

    #[error("platform rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        /// Wait the platform asked for before the next call
        retry_after: Option<Duration>,
    },

    #[error("scope not found: {0}")]
    ScopeNotFound(String),

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("failed to pull image: {0}")]
    ImagePull(String),

    #[error("failed to create container: {0}")]
    Create(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("platform error: {0}")]
    Platform(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::NotFound(_))
    }

    /// Rate limiting without a server-suggested wait
    pub fn rate_limited(message: impl Into<String>) -> Self {
        OrchestratorError::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, OrchestratorError::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            OrchestratorError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, OrchestratorError::Timeout(_))
    }

    /// Maps a platform client error, naming the scope it was raised for
    ///
    /// A 404 on a scoped endpoint means the repository or organization does not exist
    /// (or is invisible to the token). A 403 that is not rate limiting means the
    /// token lacks permission.
    pub fn from_platform(err: ClientError, scope: &str) -> Self {
        if err.is_unauthorized() || err.is_forbidden() {
            OrchestratorError::Auth(err.to_string())
        } else if err.is_rate_limited() {
            OrchestratorError::RateLimited {
                retry_after: err.retry_after(),
                message: err.to_string(),
            }
        } else if err.is_not_found() {
            OrchestratorError::ScopeNotFound(scope.to_string())
        } else if err.is_timeout() {
            OrchestratorError::Timeout(format!("platform call for {}: {}", scope, err))
        } else {
            OrchestratorError::Platform(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_platform_error_mapping() {
        let unauthorized = ClientError::api_error(401, "Bad credentials");
        assert!(matches!(
            OrchestratorError::from_platform(unauthorized, "acme/app"),
            OrchestratorError::Auth(_)
        ));

        let limited = ClientError::RateLimited {
            status: 429,
            retry_after: Some(Duration::from_secs(7)),
        };
        let mapped = OrchestratorError::from_platform(limited, "acme/app");
        assert!(mapped.is_rate_limited());
        assert_eq!(mapped.retry_after(), Some(Duration::from_secs(7)));

        let forbidden = ClientError::api_error(403, "Resource not accessible by integration");
        assert!(matches!(
            OrchestratorError::from_platform(forbidden, "acme/app"),
            OrchestratorError::Auth(_)
        ));

        let missing = ClientError::api_error(404, "Not Found");
        assert_eq!(
            OrchestratorError::from_platform(missing, "acme/app"),
            OrchestratorError::ScopeNotFound("acme/app".to_string())
        );

        let broken = ClientError::api_error(500, "boom");
        assert!(matches!(
            OrchestratorError::from_platform(broken, "acme"),
            OrchestratorError::Platform(_)
        ));
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = OrchestratorError::Create("exit status 125".to_string());
        assert_eq!(err.clone(), err);
        assert_eq!(err.to_string(), "failed to create container: exit status 125");
    }
}
