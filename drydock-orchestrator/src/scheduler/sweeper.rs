//! Cleanup sweeper
//!
//! Periodically walks a snapshot of the registry and tears down runners whose
//! container exited or vanished, runners stuck in provisioning, failed runners and
//! runners that outlived their TTL. Each runner is handled on its own; a failure on
//! one does not stop the pass.

use chrono::{DateTime, Utc};
use drydock_core::domain::runner::{Runner, RunnerStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::service::{ContainerManager, RunnerRegistry};

pub struct CleanupSweeper {
    registry: Arc<RunnerRegistry>,
    containers: Arc<ContainerManager>,
    interval: Duration,
    provisioning_timeout: Duration,
    runner_ttl: Duration,
}

impl CleanupSweeper {
    pub fn new(
        config: &Config,
        registry: Arc<RunnerRegistry>,
        containers: Arc<ContainerManager>,
    ) -> Self {
        Self {
            registry,
            containers,
            interval: config.cleanup_interval,
            provisioning_timeout: config.provisioning_timeout,
            runner_ttl: config.runner_ttl,
        }
    }

    /// Runs sweeps on the configured interval until `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Starting cleanup sweeper (interval: {:?})", self.interval);

        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let cleaned = self.sweep_once(&shutdown).await;
            if !cleaned.is_empty() {
                info!("Cleaned up {} runner(s)", cleaned.len());
            }
        }

        info!("Cleanup sweeper stopped");
    }

    /// One pass over the registry; returns the ids of removed runners
    ///
    /// Stops picking up new runners once `shutdown` is cancelled.
    pub async fn sweep_once(&self, shutdown: &CancellationToken) -> Vec<String> {
        let runners = self.registry.list();
        debug!("Sweeping {} runner(s)", runners.len());

        let mut cleaned = Vec::new();
        for runner in runners {
            if shutdown.is_cancelled() {
                debug!("Shutdown signalled, ending sweep early");
                break;
            }

            if self.sweep_runner(&runner).await {
                cleaned.push(runner.id);
            }
        }

        cleaned
    }

    /// Returns `true` when the runner was removed from the registry
    async fn sweep_runner(&self, runner: &Runner) -> bool {
        let now = Utc::now();

        match runner.status {
            RunnerStatus::Destroyed => self.registry.remove(&runner.id).is_some(),

            RunnerStatus::Error => {
                info!(
                    "Removing failed runner {}: {}",
                    runner.id,
                    runner.error.as_deref().unwrap_or("unknown error")
                );
                self.teardown(runner, RunnerStatus::Error).await
            }

            RunnerStatus::Creating => {
                if !older_than(runner.created_at, now, self.provisioning_timeout) {
                    return false;
                }

                warn!(
                    "Runner {} exceeded the provisioning timeout of {:?}",
                    runner.id, self.provisioning_timeout
                );
                if !self.registry.fail_if(
                    &runner.id,
                    RunnerStatus::Creating,
                    "provisioning timed out",
                ) {
                    debug!("Runner {} left Creating during sweep, skipping", runner.id);
                    return false;
                }
                self.teardown(runner, RunnerStatus::Error).await
            }

            RunnerStatus::Destroying => {
                // Another caller may be mid-teardown; only retry stale ones
                if !older_than(runner.last_seen_at, now, self.provisioning_timeout) {
                    return false;
                }
                info!("Retrying teardown of runner {}", runner.id);
                self.teardown(runner, RunnerStatus::Destroying).await
            }

            RunnerStatus::Registering | RunnerStatus::Running | RunnerStatus::Completing => {
                self.sweep_live(runner, now).await
            }
        }
    }

    async fn sweep_live(&self, runner: &Runner, now: DateTime<Utc>) -> bool {
        let Some(container) = runner.container_ref.as_deref() else {
            warn!("Runner {} is {} without a container", runner.id, runner.status);
            if !self
                .registry
                .fail_if(&runner.id, runner.status, "runner lost its container")
            {
                return false;
            }
            return self.teardown(runner, RunnerStatus::Error).await;
        };

        let state = match self.containers.inspect(container).await {
            Ok(state) => state,
            Err(e) if e.is_not_found() => {
                info!(
                    "Container of runner {} no longer exists, cleaning up",
                    runner.id
                );
                return self.finish(runner).await;
            }
            Err(e) => {
                warn!("Failed to inspect container of runner {}: {}", runner.id, e);
                return false;
            }
        };

        if state.exited {
            info!(
                "Runner {} finished (exit code {:?}), cleaning up",
                runner.id, state.exit_code
            );
            return self.finish(runner).await;
        }

        if older_than(runner.created_at, now, self.runner_ttl) {
            info!(
                "Runner {} exceeded its TTL of {:?}, expiring it",
                runner.id, self.runner_ttl
            );
            return self.teardown(runner, runner.status).await;
        }

        if state.running {
            if runner.status == RunnerStatus::Registering
                && self
                    .registry
                    .compare_and_set(&runner.id, RunnerStatus::Registering, RunnerStatus::Running)
            {
                info!("Runner {} is running", runner.id);
            }
            self.registry.touch(&runner.id);
        }

        false
    }

    /// A runner whose job ended: `Completing`, then teardown
    async fn finish(&self, runner: &Runner) -> bool {
        let from = if runner.status == RunnerStatus::Completing {
            RunnerStatus::Completing
        } else if self
            .registry
            .compare_and_set(&runner.id, runner.status, RunnerStatus::Completing)
        {
            RunnerStatus::Completing
        } else {
            debug!("Runner {} changed status during sweep, skipping", runner.id);
            return false;
        };

        self.teardown(runner, from).await
    }

    /// `from` → `Destroying` → destroy container → `Destroyed` → remove
    async fn teardown(&self, runner: &Runner, from: RunnerStatus) -> bool {
        if from != RunnerStatus::Destroying
            && !self
                .registry
                .compare_and_set(&runner.id, from, RunnerStatus::Destroying)
        {
            debug!("Runner {} changed status during sweep, skipping", runner.id);
            return false;
        }

        // The snapshot may predate an attached container
        let Some(current) = self.registry.get(&runner.id) else {
            return false;
        };

        if let Some(container) = current.container_ref.as_deref() {
            if let Err(e) = self.containers.destroy(container).await {
                error!(
                    "Failed to destroy container of runner {}, will retry: {}",
                    runner.id, e
                );
                return false;
            }
        }

        self.registry
            .compare_and_set(&runner.id, RunnerStatus::Destroying, RunnerStatus::Destroyed);
        self.registry.remove(&runner.id).is_some()
    }
}

fn older_than(since: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    (now - since).to_std().map(|age| age > limit).unwrap_or(false)
}
