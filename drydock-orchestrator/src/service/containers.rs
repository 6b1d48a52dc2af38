//! Container lifecycle manager
//!
//! Turns a runner record and its credential into a running container and tears
//! containers down again. Handles:
//! - Building the runner environment from templates (or the default set)
//! - Naming and labelling containers so they can be found after a restart
//! - Retrying reads and removals that time out
//! - Treating removal of an already-gone container as success

use chrono::{DateTime, Utc};
use drydock_core::domain::runner::Runner;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{OrchestratorError, Result};
use crate::platform::Credential;
use crate::retry::{RetryPolicy, retry};
use crate::runtime::{ContainerRuntime, ContainerSpec, ContainerState, ManagedContainer, labels};
use crate::service::placeholders::{self, PlaceholderContext};

const REPO_URL_BASE: &str = "https://github.com";

pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    env_templates: BTreeMap<String, String>,
    command_override: Option<String>,
    hostname: String,
    orchestrator_id: String,
    read_policy: RetryPolicy,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &Config) -> Self {
        Self {
            runtime,
            image: config.runner_image.clone(),
            env_templates: config.env_templates.clone(),
            command_override: config.command_override.clone(),
            hostname: local_hostname(),
            orchestrator_id: format!("orchestrator-{}", std::process::id()),
            read_policy: RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(5)),
        }
    }

    /// Starts the container for `runner` and returns its id
    ///
    /// A create that times out may still have produced a container, so it is
    /// removed by name before the timeout is reported.
    pub async fn create(&self, runner: &Runner, credential: &Credential) -> Result<String> {
        let spec = self.container_spec(runner, credential, Utc::now());
        debug!("Container spec for runner {}: {:?}", runner.id, spec);

        match self.runtime.create_container(&spec).await {
            Ok(container_id) => Ok(container_id),
            Err(e) if e.is_timeout() => {
                warn!(
                    "Creating container {} timed out, removing it by name",
                    spec.name
                );
                if let Err(remove_err) = self.runtime.remove_container(&spec.name).await {
                    if !remove_err.is_not_found() {
                        warn!("Failed to remove timed out container {}: {}", spec.name, remove_err);
                    }
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn inspect(&self, container_ref: &str) -> Result<ContainerState> {
        retry(&self.read_policy, "inspect container", OrchestratorError::is_timeout, || {
            self.runtime.inspect_container(container_ref)
        })
        .await
    }

    /// Removes a container; a container that no longer exists counts as removed
    pub async fn destroy(&self, container_ref: &str) -> Result<()> {
        let result = retry(&self.read_policy, "remove container", OrchestratorError::is_timeout, || {
            self.runtime.remove_container(container_ref)
        })
        .await;

        match result {
            Ok(()) => {
                info!("Destroyed container {}", container_ref);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("Container {} already gone", container_ref);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Last `tail` lines of a container's output
    pub async fn logs(&self, container_ref: &str, tail: usize) -> Result<String> {
        retry(&self.read_policy, "container logs", OrchestratorError::is_timeout, || {
            self.runtime.container_logs(container_ref, tail)
        })
        .await
    }

    pub async fn list_managed(&self) -> Result<Vec<ManagedContainer>> {
        retry(&self.read_policy, "list containers", OrchestratorError::is_timeout, || {
            self.runtime.list_managed_containers()
        })
        .await
    }

    /// Value of the orchestrator label set on every container this process creates
    pub fn orchestrator_id(&self) -> &str {
        &self.orchestrator_id
    }

    pub async fn ping(&self) -> Result<()> {
        self.runtime.ping().await
    }

    fn container_spec(&self, runner: &Runner, credential: &Credential, now: DateTime<Utc>) -> ContainerSpec {
        let ctx = self.placeholder_context(runner, credential, now);

        let command = self.command_override.as_ref().map(|template| {
            let resolved = placeholders::resolve(template, &ctx);
            warn_unresolved("RUNNER_COMMAND", &resolved.unresolved);
            resolved.value
        });

        ContainerSpec {
            name: container_name(runner),
            image: self.image.clone(),
            env: self.build_environment(runner, &ctx),
            labels: container_labels(runner, &credential.fingerprint()),
            command,
        }
    }

    fn placeholder_context(
        &self,
        runner: &Runner,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> PlaceholderContext {
        PlaceholderContext {
            scope_name: runner.scope_name.clone(),
            registration_token: credential.secret().to_string(),
            runner_name: runner.runner_name.clone(),
            runner_group: runner.runner_group.clone(),
            runner_image: self.image.clone(),
            hostname: self.hostname.clone(),
            orchestrator_id: self.orchestrator_id.clone(),
            now,
        }
    }

    /// Environment of the runner container
    ///
    /// Without templates the runner gets `REPO_URL`, `RUNNER_TOKEN` and
    /// `RUNNER_NAME`. `RUNNER_GROUP` and `RUNNER_LABELS` are added whenever the
    /// runner has a group or labels.
    fn build_environment(&self, runner: &Runner, ctx: &PlaceholderContext) -> Vec<(String, String)> {
        let mut env: BTreeMap<String, String> = if self.env_templates.is_empty() {
            BTreeMap::from([
                (
                    "REPO_URL".to_string(),
                    format!("{}/{}", REPO_URL_BASE, runner.scope_name),
                ),
                ("RUNNER_TOKEN".to_string(), ctx.registration_token.clone()),
                ("RUNNER_NAME".to_string(), runner.runner_name.clone()),
            ])
        } else {
            self.env_templates
                .iter()
                .map(|(key, template)| {
                    let resolved = placeholders::resolve(template, ctx);
                    warn_unresolved(key, &resolved.unresolved);
                    (key.clone(), resolved.value)
                })
                .collect()
        };

        if let Some(group) = &runner.runner_group {
            env.insert("RUNNER_GROUP".to_string(), group.clone());
        }
        if !runner.labels.is_empty() {
            let joined = runner.labels.iter().cloned().collect::<Vec<_>>().join(",");
            env.insert("RUNNER_LABELS".to_string(), joined);
        }

        env.into_iter().collect()
    }
}

fn warn_unresolved(key: &str, unresolved: &[String]) {
    if !unresolved.is_empty() {
        warn!(
            "Template for {} has unresolved placeholders: {}",
            key,
            unresolved.join(", ")
        );
    }
}

/// `drydock-<runner_name>-<first 8 chars of id>`
pub fn container_name(runner: &Runner) -> String {
    let short_id: String = runner.id.chars().filter(|c| *c != '-').take(8).collect();
    format!("drydock-{}-{}", runner.runner_name, short_id)
}

pub fn container_labels(runner: &Runner, fingerprint: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::MANAGED.to_string(), "true".to_string()),
        (labels::RUNNER_ID.to_string(), runner.id.clone()),
        (labels::RUNNER_NAME.to_string(), runner.runner_name.clone()),
        (labels::SCOPE.to_string(), runner.scope.as_str().to_string()),
        (labels::SCOPE_NAME.to_string(), runner.scope_name.clone()),
        (labels::CREDENTIAL.to_string(), fingerprint.to_string()),
        (
            labels::LABELS.to_string(),
            runner.labels.iter().cloned().collect::<Vec<_>>().join(","),
        ),
    ])
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
