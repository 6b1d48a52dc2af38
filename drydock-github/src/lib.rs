//! Drydock GitHub Client
//!
//! A small, type-safe HTTP client for the parts of the GitHub REST API the
//! orchestrator needs: runner registration tokens, repository discovery,
//! workflow files and queued workflow runs.
//!
//! # Example
//!
//! ```no_run
//! use drydock_github::GitHubClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), drydock_github::ClientError> {
//!     let client = GitHubClient::new("https://api.github.com", "ghp_example");
//!
//!     let token = client.create_repo_registration_token("acme", "app").await?;
//!     println!("token expires at {:?}", token.expires_at);
//!     Ok(())
//! }
//! ```

mod actions;
pub mod error;
mod repos;
mod tokens;

// Re-export commonly used types
pub use actions::WorkflowFile;
pub use error::{ClientError, Result};
pub use repos::{Organization, Repository};
pub use tokens::RegistrationToken;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, RETRY_AFTER, USER_AGENT};
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default public API endpoint
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 50;

const RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// HTTP client for the GitHub REST API
///
/// Methods are grouped by concern:
/// - Registration tokens for repository and organization runners
/// - Repository and organization discovery
/// - Workflow files and queued workflow runs
#[derive(Clone)]
pub struct GitHubClient {
    /// Base URL of the API (e.g., "https://api.github.com")
    base_url: String,
    /// Personal access token or app token used for every call
    token: String,
    /// HTTP client instance
    client: Client,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl GitHubClient {
    /// Create a new client with a default HTTP client
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(base_url, token, Client::new())
    }

    /// Create a new client whose every request is bounded by `timeout`
    pub fn with_timeout(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, token, client))
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, token: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        }
    }

    /// Get the base URL of the API
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Attach authentication and the headers GitHub requires on every call
    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        self.authorized_as(builder, JSON_MEDIA_TYPE)
    }

    /// Like [`Self::authorized`], asking for `media_type` instead of JSON
    fn authorized_as(&self, builder: RequestBuilder, media_type: &str) -> RequestBuilder {
        builder
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, media_type)
            .header(USER_AGENT, concat!("drydock/", env!("CARGO_PKG_VERSION")))
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// GET a JSON document
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.authorized(self.client.get(self.url(path))).send().await?;
        self.handle_response(response).await
    }

    /// GET every page of a JSON array endpoint
    async fn get_paginated<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let separator = if path.contains('?') { '&' } else { '?' };
        let mut items = Vec::new();

        for page in 1..=MAX_PAGES {
            let page_path = format!("{}{}per_page={}&page={}", path, separator, PAGE_SIZE, page);
            let batch: Vec<T> = self.get_json(&page_path).await?;
            let done = batch.len() < PAGE_SIZE;
            items.extend(batch);
            if done {
                return Ok(items);
            }
        }

        tracing::warn!("Stopped paginating {} after {} pages", path, MAX_PAGES);
        Ok(items)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    ///
    /// Rate limiting is reported separately from other failures so callers can
    /// back off.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response whose body is plain text
    async fn handle_text_response(&self, response: reqwest::Response) -> Result<String> {
        let response = Self::check_status(response).await?;

        response
            .text()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to read response body: {}", e)))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if let Some(limited) = rate_limit(status, response.headers(), Utc::now().timestamp()) {
            return Err(limited);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ClientError::api_error(status.as_u16(), error_text))
    }
}

/// Classifies a failed response as rate limiting
///
/// 429 always is. 403 only when the quota is exhausted (`x-ratelimit-remaining: 0`)
/// or the server asks for a pause (`Retry-After`); any other 403 is a permission
/// error. The wait comes from `Retry-After`, else from `x-ratelimit-reset`.
fn rate_limit(status: StatusCode, headers: &HeaderMap, now: i64) -> Option<ClientError> {
    let exhausted = header_str(headers, RATELIMIT_REMAINING) == Some("0");
    let retry_after = retry_after(headers);

    let limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && (exhausted || retry_after.is_some()));
    if !limited {
        return None;
    }

    let retry_after = retry_after.or_else(|| {
        exhausted
            .then(|| header_str(headers, RATELIMIT_RESET)?.parse::<i64>().ok())
            .flatten()
            .map(|reset| Duration::from_secs(reset.saturating_sub(now).max(0) as u64))
    });

    Some(ClientError::RateLimited {
        status: status.as_u16(),
        retry_after,
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok().map(str::trim)
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_client_creation() {
        let client = GitHubClient::new("https://api.github.com", "t");
        assert_eq!(client.base_url(), "https://api.github.com");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = GitHubClient::new("https://ghe.example.com/api/v3/", "t");
        assert_eq!(client.base_url(), "https://ghe.example.com/api/v3");
        assert_eq!(
            client.url("/user/repos"),
            "https://ghe.example.com/api/v3/user/repos"
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let client = GitHubClient::new(DEFAULT_API_URL, "ghp_secret_value");
        let rendered = format!("{:?}", client);
        assert!(!rendered.contains("ghp_secret_value"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("17"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(17)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_plain_forbidden_is_not_rate_limited() {
        let mut headers = HeaderMap::new();
        assert!(rate_limit(StatusCode::FORBIDDEN, &headers, 0).is_none());

        headers.insert(RATELIMIT_REMAINING, HeaderValue::from_static("4999"));
        assert!(rate_limit(StatusCode::FORBIDDEN, &headers, 0).is_none());
        assert!(rate_limit(StatusCode::NOT_FOUND, &headers, 0).is_none());
    }

    #[test]
    fn test_exhausted_quota_waits_until_reset() {
        let mut headers = HeaderMap::new();
        headers.insert(RATELIMIT_REMAINING, HeaderValue::from_static("0"));
        headers.insert(RATELIMIT_RESET, HeaderValue::from_static("1700000042"));

        let err = rate_limit(StatusCode::FORBIDDEN, &headers, 1_700_000_000).unwrap();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));

        // A reset already in the past means no wait
        let err = rate_limit(StatusCode::FORBIDDEN, &headers, 1_800_000_000).unwrap();
        assert_eq!(err.retry_after(), Some(Duration::ZERO));
    }

    #[test]
    fn test_secondary_limit_uses_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("60"));

        let err = rate_limit(StatusCode::FORBIDDEN, &headers, 0).unwrap();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_too_many_requests_is_always_rate_limited() {
        let err = rate_limit(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new(), 0).unwrap();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), None);
    }
}
