//! Container runtime layer
//!
//! Thin, trait-based access to the container runtime. The CLI implementation
//! drives `docker` or `podman`; tests use an in-memory runtime.

mod cli;
#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;

pub use cli::CliRuntime;

/// Label keys attached to every container the orchestrator creates
pub mod labels {
    pub const MANAGED: &str = "drydock.managed";
    pub const RUNNER_ID: &str = "drydock.runner-id";
    pub const RUNNER_NAME: &str = "drydock.runner-name";
    pub const SCOPE: &str = "drydock.scope";
    pub const SCOPE_NAME: &str = "drydock.scope-name";
    pub const CREDENTIAL: &str = "drydock.credential";
    pub const LABELS: &str = "drydock.labels";
}

/// Everything needed to start one runner container
#[derive(Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Environment variables; values may hold secrets
    pub env: Vec<(String, String)>,
    pub labels: BTreeMap<String, String>,
    /// Replaces the image's default command, run through `sh -c`
    pub command: Option<String>,
}

impl std::fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSpec")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("env", &self.env.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("labels", &self.labels)
            .field("command", &self.command.is_some())
            .finish()
    }
}

/// Observed state of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerState {
    pub running: bool,
    pub exited: bool,
    pub exit_code: Option<i64>,
}

impl ContainerState {
    pub fn running() -> Self {
        Self {
            running: true,
            exited: false,
            exit_code: None,
        }
    }

    pub fn exited(exit_code: i64) -> Self {
        Self {
            running: false,
            exited: true,
            exit_code: Some(exit_code),
        }
    }

    /// Builds a state from the runtime's status word (`running`, `exited`, ...)
    pub fn from_status(status: &str, exit_code: Option<i64>) -> Self {
        let status = status.trim().to_ascii_lowercase();
        let exited = matches!(status.as_str(), "exited" | "dead" | "stopped");
        Self {
            running: status == "running",
            exited,
            exit_code: if exited { exit_code } else { None },
        }
    }
}

/// A container carrying the managed label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub id: String,
    pub state: ContainerState,
    pub labels: BTreeMap<String, String>,
}

/// Container runtime operations
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Starts a detached container and returns its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Fails with `NotFound` when the container does not exist
    async fn inspect_container(&self, container_ref: &str) -> Result<ContainerState>;

    /// Force-removes a container by id or name; fails with `NotFound` when absent
    async fn remove_container(&self, container_ref: &str) -> Result<()>;

    /// Last `tail` lines of a container's output, stdout and stderr interleaved
    ///
    /// Fails with `NotFound` when the container does not exist.
    async fn container_logs(&self, container_ref: &str, tail: usize) -> Result<String>;

    /// Every container labelled `drydock.managed=true`
    async fn list_managed_containers(&self) -> Result<Vec<ManagedContainer>>;

    /// Checks that the runtime answers
    async fn ping(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_status() {
        assert_eq!(ContainerState::from_status("running", Some(0)), ContainerState::running());
        assert_eq!(ContainerState::from_status("exited", Some(3)), ContainerState::exited(3));
        assert!(ContainerState::from_status("Dead", Some(137)).exited);

        let created = ContainerState::from_status("created", Some(0));
        assert!(!created.running && !created.exited);
        assert_eq!(created.exit_code, None);
    }

    #[test]
    fn test_spec_debug_hides_env_values() {
        let spec = ContainerSpec {
            name: "drydock-r-1234abcd".to_string(),
            image: "runner:latest".to_string(),
            env: vec![("RUNNER_TOKEN".to_string(), "secret-value".to_string())],
            labels: BTreeMap::new(),
            command: None,
        };

        let rendered = format!("{:?}", spec);
        assert!(rendered.contains("RUNNER_TOKEN"));
        assert!(!rendered.contains("secret-value"));
    }
}
