//! GitHub implementation of the platform layer

use async_trait::async_trait;
use drydock_core::domain::runner::Scope;
use drydock_github::{ClientError, GitHubClient, Repository};
use std::time::Duration;
use tracing::{debug, info};

use super::{Credential, Platform, WorkflowFile, split_repo};
use crate::config::DiscoveryMode;
use crate::error::{OrchestratorError, Result};
use crate::retry::{RetryPolicy, retry};

/// Platform backed by the GitHub REST API
pub struct GitHubPlatform {
    client: GitHubClient,
    read_policy: RetryPolicy,
}

impl GitHubPlatform {
    /// Creates a platform whose every call is bounded by `api_timeout`
    pub fn new(base_url: &str, token: &str, api_timeout: Duration) -> Result<Self> {
        let client = GitHubClient::with_timeout(base_url, token, api_timeout)
            .map_err(|e| OrchestratorError::Platform(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client))
    }

    pub fn with_client(client: GitHubClient) -> Self {
        Self {
            client,
            read_policy: RetryPolicy::rate_limit(),
        }
    }

    /// Reads are retried on rate limiting and on timeouts
    async fn read<T, F, Fut>(&self, what: &str, scope: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, ClientError>>,
    {
        retry(
            &self.read_policy,
            what,
            |e| e.is_rate_limited() || e.is_timeout(),
            || {
                let call = f();
                async move { call.await.map_err(|e| OrchestratorError::from_platform(e, scope)) }
            },
        )
        .await
    }

    async fn first_organization(&self) -> Result<Option<String>> {
        let orgs = self
            .read("list organizations", "user", || {
                self.client.list_user_organizations()
            })
            .await?;

        Ok(orgs.into_iter().next().map(|org| org.login))
    }
}

#[async_trait]
impl Platform for GitHubPlatform {
    async fn issue_registration_token(&self, scope: Scope, scope_name: &str) -> Result<Credential> {
        let token = match scope {
            Scope::Repository => {
                let (owner, repo) = split_repo(scope_name).ok_or_else(|| {
                    OrchestratorError::Validation(format!(
                        "'{}' is not an owner/repo name",
                        scope_name
                    ))
                })?;
                self.client.create_repo_registration_token(owner, repo).await
            }
            Scope::Organization => self.client.create_org_registration_token(scope_name).await,
        }
        .map_err(|e| OrchestratorError::from_platform(e, scope_name))?;

        debug!("Issued registration credential for {} {}", scope, scope_name);

        Ok(Credential::from(token))
    }

    async fn list_repositories(
        &self,
        mode: DiscoveryMode,
        organization: Option<&str>,
    ) -> Result<Vec<String>> {
        let org = match (mode, organization) {
            (DiscoveryMode::Organization, Some(org)) => Some(org.to_string()),
            _ => self.first_organization().await?,
        };

        let repos: Vec<Repository> = match (mode, org) {
            (_, Some(org)) => {
                info!("Discovering repositories of organization {}", org);
                self.read("list organization repositories", &org, || {
                    self.client.list_organization_repositories(&org)
                })
                .await?
            }
            (DiscoveryMode::All, None) => {
                info!("Discovering repositories of the authenticated user");
                self.read("list user repositories", "user", || {
                    self.client.list_user_repositories()
                })
                .await?
            }
            (DiscoveryMode::Organization, None) => {
                return Err(OrchestratorError::Validation(
                    "organization discovery requested but the account belongs to no organization"
                        .to_string(),
                ));
            }
        };

        Ok(repos
            .into_iter()
            .filter(Repository::is_active)
            .map(|r| r.full_name)
            .collect())
    }

    async fn get_workflows(&self, repo_full_name: &str) -> Result<Vec<WorkflowFile>> {
        let (owner, repo) = split_repo(repo_full_name)
            .ok_or_else(|| OrchestratorError::Validation(repo_full_name.to_string()))?;

        self.read("list workflow files", repo_full_name, || {
            self.client.list_workflow_files(owner, repo)
        })
        .await
    }

    async fn get_queued_job_count(&self, repo_full_name: &str) -> Result<u32> {
        let (owner, repo) = split_repo(repo_full_name)
            .ok_or_else(|| OrchestratorError::Validation(repo_full_name.to_string()))?;

        self.read("count queued runs", repo_full_name, || {
            self.client.count_queued_runs(owner, repo)
        })
        .await
    }
}
