//! Runner domain model
//!
//! Represents an ephemeral runner: one container that executes exactly one CI job
//! and is destroyed afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ownership boundary a registration credential and a runner are bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    /// A single repository, named `owner/name`
    #[serde(rename = "repo", alias = "repository")]
    Repository,

    /// A whole organization
    #[serde(rename = "org", alias = "organization")]
    Organization,
}

impl Scope {
    /// Short wire name (`repo` / `org`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Repository => "repo",
            Scope::Organization => "org",
        }
    }

    /// Checks that `scope_name` has the shape this scope requires
    ///
    /// Repository scope requires exactly one `/` with a non-empty owner and name.
    /// Organization scope requires a non-empty name without `/`.
    pub fn validate_name(&self, scope_name: &str) -> Result<(), String> {
        let name = scope_name.trim();
        if name.is_empty() {
            return Err("scope_name cannot be empty".to_string());
        }

        match self {
            Scope::Repository => match name.split_once('/') {
                Some((owner, repo))
                    if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') =>
                {
                    Ok(())
                }
                _ => Err(format!(
                    "scope_name '{}' must have the form 'owner/repo' for repository scope",
                    scope_name
                )),
            },
            Scope::Organization => {
                if name.contains('/') {
                    Err(format!(
                        "scope_name '{}' must be a bare organization name",
                        scope_name
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "repo" | "repository" => Ok(Scope::Repository),
            "org" | "organization" => Ok(Scope::Organization),
            other => Err(format!(
                "unknown scope '{}', expected 'repo' or 'org'",
                other
            )),
        }
    }
}

/// An ephemeral runner tracked by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runner {
    /// Unique identifier, generated at creation
    pub id: String,

    /// Name the runner registers under on the platform
    pub runner_name: String,

    /// Repository or organization scope
    pub scope: Scope,

    /// `owner/name` for repositories, the organization name otherwise
    pub scope_name: String,

    /// Optional runner group
    pub runner_group: Option<String>,

    /// Current lifecycle status
    pub status: RunnerStatus,

    /// Runtime container id, set once the container exists
    pub container_ref: Option<String>,

    /// Informational labels
    pub labels: BTreeSet<String>,

    /// When the runner was requested
    pub created_at: DateTime<Utc>,

    /// Last time the runner was observed alive
    pub last_seen_at: DateTime<Utc>,

    /// Fingerprint of the registration credential (never the credential itself)
    pub credential_fingerprint: Option<String>,

    /// Last error recorded for this runner
    pub error: Option<String>,
}

impl Runner {
    /// Creates a runner in the `Creating` state with a fresh id
    pub fn new(
        runner_name: impl Into<String>,
        scope: Scope,
        scope_name: impl Into<String>,
        runner_group: Option<String>,
        labels: BTreeSet<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            runner_name: runner_name.into(),
            scope,
            scope_name: scope_name.into(),
            runner_group,
            status: RunnerStatus::Creating,
            container_ref: None,
            labels,
            created_at: now,
            last_seen_at: now,
            credential_fingerprint: None,
            error: None,
        }
    }

    /// Whether this runner is being (or about to be) provisioned or already serving
    /// its scope
    pub fn covers(&self, scope: Scope, scope_name: &str) -> bool {
        self.scope == scope
            && self.scope_name == scope_name
            && matches!(
                self.status,
                RunnerStatus::Creating | RunnerStatus::Registering | RunnerStatus::Running
            )
    }
}

/// Lifecycle status of a runner
///
/// Statuses move forward only, in declaration order. `Error` is reachable from any
/// non-terminal status, and a failed runner may still be torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunnerStatus {
    /// Credential issuance and container creation in progress
    Creating,

    /// Container started, runner registering with the platform
    Registering,

    /// Runner online and able to take a job
    Running,

    /// Job finished, container exited
    Completing,

    /// Container removal in progress
    Destroying,

    /// Container removed
    Destroyed,

    /// Provisioning or supervision failed
    Error,
}

impl RunnerStatus {
    fn rank(&self) -> u8 {
        match self {
            RunnerStatus::Creating => 0,
            RunnerStatus::Registering => 1,
            RunnerStatus::Running => 2,
            RunnerStatus::Completing => 3,
            RunnerStatus::Destroying => 4,
            RunnerStatus::Destroyed => 5,
            RunnerStatus::Error => 6,
        }
    }

    /// `Destroyed` is the only terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunnerStatus::Destroyed)
    }

    /// Whether the runner still counts against active capacity
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunnerStatus::Creating
                | RunnerStatus::Registering
                | RunnerStatus::Running
                | RunnerStatus::Completing
        )
    }

    /// Checks whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: RunnerStatus) -> bool {
        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (RunnerStatus::Error, RunnerStatus::Destroying | RunnerStatus::Destroyed) => true,
            (RunnerStatus::Error, _) => false,
            (_, RunnerStatus::Error) => true,
            (current, next) => next.rank() > current.rank(),
        }
    }
}

impl std::fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerStatus::Creating => write!(f, "Creating"),
            RunnerStatus::Registering => write!(f, "Registering"),
            RunnerStatus::Running => write!(f, "Running"),
            RunnerStatus::Completing => write!(f, "Completing"),
            RunnerStatus::Destroying => write!(f, "Destroying"),
            RunnerStatus::Destroyed => write!(f, "Destroyed"),
            RunnerStatus::Error => write!(f, "Error"),
        }
    }
}
