//! Platform layer
//!
//! The source-control platform the orchestrator issues registration credentials
//! from and discovers demand on. The trait keeps the rest of the orchestrator
//! independent of the HTTP client so it can be replaced in tests.

mod credential;
#[cfg(test)]
pub mod fake;
mod github;

use async_trait::async_trait;
use drydock_core::domain::runner::Scope;

use crate::config::DiscoveryMode;
use crate::error::Result;

pub use credential::Credential;
pub use drydock_github::WorkflowFile;
pub use github::GitHubPlatform;

/// Outbound operations against the source-control platform
#[async_trait]
pub trait Platform: Send + Sync {
    /// Requests a fresh registration credential for a repository or organization
    ///
    /// Fails with `Auth`, `RateLimited`, `ScopeNotFound` or `Timeout`.
    async fn issue_registration_token(&self, scope: Scope, scope_name: &str) -> Result<Credential>;

    /// Lists `owner/name` of the repositories to watch for demand
    async fn list_repositories(
        &self,
        mode: DiscoveryMode,
        organization: Option<&str>,
    ) -> Result<Vec<String>>;

    /// Fetches the workflow definitions of a repository
    async fn get_workflows(&self, repo_full_name: &str) -> Result<Vec<WorkflowFile>>;

    /// Number of workflow runs of a repository waiting for a runner
    async fn get_queued_job_count(&self, repo_full_name: &str) -> Result<u32>;
}

/// Splits `owner/name`
pub(crate) fn split_repo(full_name: &str) -> Option<(&str, &str)> {
    full_name
        .split_once('/')
        .filter(|(owner, name)| !owner.is_empty() && !name.is_empty())
}
