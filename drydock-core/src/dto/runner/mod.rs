//! Runner DTOs
//!
//! Data transfer objects for runner-related operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::runner::{Runner, RunnerStatus, Scope};

/// Smallest number of runners a single create request may ask for
pub const MIN_RUNNER_COUNT: u32 = 1;

/// Largest number of runners a single create request may ask for
pub const MAX_RUNNER_COUNT: u32 = 10;

fn default_count() -> u32 {
    1
}

/// Request to create one or more ephemeral runners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRunners {
    /// Repository or organization scope
    pub scope: Scope,

    /// `owner/repo` or organization name
    pub scope_name: String,

    /// Optional base name; suffixed with `-<n>` when `count > 1`
    #[serde(default)]
    pub runner_name: Option<String>,

    /// Optional runner group
    #[serde(default)]
    pub runner_group: Option<String>,

    /// Informational labels
    #[serde(default)]
    pub labels: Option<Vec<String>>,

    /// Number of runners to create (1-10)
    #[serde(default = "default_count")]
    pub count: u32,
}

impl CreateRunners {
    /// A request for a single runner with no name, group, or labels
    pub fn single(scope: Scope, scope_name: impl Into<String>) -> Self {
        Self {
            scope,
            scope_name: scope_name.into(),
            runner_name: None,
            runner_group: None,
            labels: None,
            count: 1,
        }
    }

    /// Labels as a set, dropping blanks and duplicates
    pub fn label_set(&self) -> BTreeSet<String> {
        self.labels
            .iter()
            .flatten()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Per-runner result of a create request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRunner {
    pub runner_id: String,
    pub status: RunnerStatus,
    pub message: String,
}

/// Externally visible state of a runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSummary {
    pub runner_id: String,
    pub runner_name: String,
    pub scope: Scope,
    pub scope_name: String,
    pub status: RunnerStatus,
    pub container_id: Option<String>,
    pub labels: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl From<Runner> for RunnerSummary {
    fn from(runner: Runner) -> Self {
        RunnerSummary {
            runner_id: runner.id,
            runner_name: runner.runner_name,
            scope: runner.scope,
            scope_name: runner.scope_name,
            status: runner.status,
            container_id: runner
                .container_ref
                .map(|c| c.chars().take(12).collect::<String>()),
            labels: runner.labels,
            created_at: runner.created_at,
            last_seen_at: runner.last_seen_at,
            error: runner.error,
        }
    }
}

/// Recent container output of a runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerLogs {
    pub runner_id: String,
    pub runner_name: String,
    pub tail: usize,
    pub logs: String,
}

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    /// `true` only when this call destroyed the runner
    pub destroyed: bool,
}

/// Result of a cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub cleaned_count: usize,
    pub cleaned_ids: Vec<String>,
}

impl CleanupReport {
    pub fn from_ids(cleaned_ids: Vec<String>) -> Self {
        Self {
            cleaned_count: cleaned_ids.len(),
            cleaned_ids,
        }
    }
}

/// Overall service health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Result of a health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub active_runner_count: usize,
    pub auto_create_runners: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub problems: Vec<String>,
}
