//! Reconciliation loop
//!
//! Each tick discovers repositories, keeps those whose workflows run on
//! self-hosted runners, measures their queued jobs and requests one runner per
//! repository that has work but nothing covering it.

use drydock_core::domain::demand::DemandSnapshot;
use drydock_core::domain::runner::{Runner, RunnerStatus, Scope};
use drydock_core::dto::runner::CreateRunners;
use serde_yaml::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DiscoveryMode};
use crate::error::Result;
use crate::platform::Platform;
use crate::service::{RunnerRegistry, RunnerService};

/// Label a workflow job uses to ask for a self-hosted runner
const SELF_HOSTED_LABEL: &str = "self-hosted";

pub struct Reconciler {
    platform: Arc<dyn Platform>,
    registry: Arc<RunnerRegistry>,
    service: Arc<RunnerService>,
    discovery_mode: DiscoveryMode,
    organization: Option<String>,
    interval: Duration,
    max_concurrent_creations: usize,
}

impl Reconciler {
    pub fn new(
        config: &Config,
        platform: Arc<dyn Platform>,
        registry: Arc<RunnerRegistry>,
        service: Arc<RunnerService>,
    ) -> Self {
        Self {
            platform,
            registry,
            service,
            discovery_mode: config.discovery_mode,
            organization: config.organization.clone(),
            interval: config.reconcile_interval,
            max_concurrent_creations: config.max_concurrent_creations,
        }
    }

    /// Runs ticks on the configured interval until `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            "Starting reconciliation loop (mode: {:?}, interval: {:?})",
            self.discovery_mode, self.interval
        );

        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.tick(&shutdown).await {
                Ok(0) => debug!("Reconciliation tick requested no runners"),
                Ok(n) => info!("Reconciliation tick requested {} runner(s)", n),
                Err(e) => error!("Reconciliation tick failed: {}", e),
            }
        }

        info!("Reconciliation loop stopped");
    }

    /// One discover, measure, decide, act cycle
    ///
    /// Returns the number of runners requested. Fails only when discovery itself
    /// fails; per-repository failures are logged and skipped.
    pub async fn tick(&self, shutdown: &CancellationToken) -> Result<usize> {
        let repositories = self
            .platform
            .list_repositories(self.discovery_mode, self.organization.as_deref())
            .await?;
        debug!("Discovered {} repositories", repositories.len());

        let mut snapshot = DemandSnapshot::new();
        for repo in &repositories {
            if shutdown.is_cancelled() {
                debug!("Shutdown signalled, ending tick early");
                return Ok(0);
            }

            match self.measure(repo).await {
                Ok(Some(queued)) => snapshot.record(Scope::Repository, repo.as_str(), queued),
                Ok(None) => debug!("{} does not use self-hosted runners", repo),
                Err(e) => warn!("Skipping {}: {}", repo, e),
            }
        }

        if snapshot.total_queued() > 0 {
            info!(
                "{} queued job(s) across {} repositories",
                snapshot.total_queued(),
                snapshot.len()
            );
        }

        let runners = self.registry.list();
        let budget = self
            .max_concurrent_creations
            .saturating_sub(runners.iter().filter(|r| r.status == RunnerStatus::Creating).count());

        let mut requested = 0;
        for req in decide(&snapshot, &runners, budget) {
            if shutdown.is_cancelled() {
                break;
            }

            let scope_name = req.scope_name.clone();
            match self.service.create(req).await {
                Ok(created) => {
                    info!("Requested {} runner(s) for {}", created.len(), scope_name);
                    requested += created.len();
                }
                Err(e) => warn!("Failed to request runner for {}: {}", scope_name, e),
            }
        }

        Ok(requested)
    }

    /// Queued job count for a repository, or `None` if none of its workflows
    /// use self-hosted runners
    async fn measure(&self, repo: &str) -> Result<Option<u32>> {
        let workflows = self.platform.get_workflows(repo).await?;

        let self_hosted = workflows.iter().any(|wf| match uses_self_hosted(&wf.content) {
            Ok(found) => found,
            Err(e) => {
                warn!("Skipping unparsable workflow {} in {}: {}", wf.name, repo, e);
                false
            }
        });

        if !self_hosted {
            return Ok(None);
        }

        self.platform.get_queued_job_count(repo).await.map(Some)
    }
}

/// One creation request per scope with queued jobs and no runner covering it,
/// at most `budget` in total
pub fn decide(snapshot: &DemandSnapshot, runners: &[Runner], budget: usize) -> Vec<CreateRunners> {
    snapshot
        .pending()
        .filter(|d| !runners.iter().any(|r| r.covers(d.scope, &d.scope_name)))
        .take(budget)
        .map(|d| CreateRunners::single(d.scope, d.scope_name.clone()))
        .collect()
}

/// Whether any job of a workflow definition runs on a self-hosted runner
///
/// `runs-on` may be a single label, a list of labels, or a mapping with a
/// `labels` entry holding either.
pub fn uses_self_hosted(content: &str) -> std::result::Result<bool, serde_yaml::Error> {
    let workflow: Value = serde_yaml::from_str(content)?;

    let Some(jobs) = workflow.get("jobs").and_then(Value::as_mapping) else {
        return Ok(false);
    };

    Ok(jobs
        .values()
        .filter_map(|job| job.get("runs-on"))
        .any(|runs_on| match runs_on {
            Value::Mapping(m) => m
                .get("labels")
                .is_some_and(has_self_hosted_label),
            other => has_self_hosted_label(other),
        }))
}

fn has_self_hosted_label(value: &Value) -> bool {
    match value {
        Value::String(label) => label.trim() == SELF_HOSTED_LABEL,
        Value::Sequence(labels) => labels
            .iter()
            .filter_map(Value::as_str)
            .any(|label| label.trim() == SELF_HOSTED_LABEL),
        _ => false,
    }
}
