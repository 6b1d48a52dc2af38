//! Runner Service
//!
//! Entry points used by the HTTP API and the reconciliation loop: create, get,
//! list, delete, cleanup and health. Creation registers runners as `Creating` and
//! returns immediately; provisioning runs in the background on a `TaskTracker`.

use chrono::Utc;
use drydock_core::domain::runner::{Runner, RunnerStatus, Scope};
use drydock_core::dto::runner::{
    CleanupReport, CreateRunners, CreatedRunner, DeleteOutcome, HealthReport, HealthStatus,
    MAX_RUNNER_COUNT, MIN_RUNNER_COUNT, RunnerLogs, RunnerSummary,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{OrchestratorError, Result};
use crate::runtime::{ManagedContainer, labels};
use crate::scheduler::CleanupSweeper;
use crate::service::containers::ContainerManager;
use crate::service::credentials::CredentialIssuer;
use crate::service::registry::RunnerRegistry;

/// Longest runner name handed to the platform
pub const MAX_RUNNER_NAME_LEN: usize = 64;

/// Above this many active runners the service reports itself degraded
pub const MAX_HEALTHY_ACTIVE_RUNNERS: usize = 100;

/// Lines of container output returned by `logs`
pub const DEFAULT_LOG_TAIL: usize = 200;

pub struct RunnerService {
    registry: Arc<RunnerRegistry>,
    containers: Arc<ContainerManager>,
    sweeper: Arc<CleanupSweeper>,
    provisioner: Provisioner,
    tasks: TaskTracker,
    auto_create_runners: bool,
}

impl RunnerService {
    pub fn new(
        config: &Config,
        registry: Arc<RunnerRegistry>,
        issuer: Arc<CredentialIssuer>,
        containers: Arc<ContainerManager>,
        sweeper: Arc<CleanupSweeper>,
        tasks: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        let provisioner = Provisioner {
            registry: Arc::clone(&registry),
            issuer,
            containers: Arc::clone(&containers),
            permits: Arc::new(Semaphore::new(config.max_concurrent_creations)),
            shutdown,
        };

        Self {
            registry,
            containers,
            sweeper,
            provisioner,
            tasks,
            auto_create_runners: config.auto_create_runners,
        }
    }

    /// Registers the requested runners and starts provisioning them
    ///
    /// Fails with `Validation` on a malformed request and `ShuttingDown` once
    /// shutdown has been signalled.
    pub async fn create(&self, req: CreateRunners) -> Result<Vec<CreatedRunner>> {
        if self.provisioner.shutdown.is_cancelled() {
            return Err(OrchestratorError::ShuttingDown);
        }

        validate_create_request(&req)?;
        let names = runner_names(req.runner_name.as_deref(), req.count)?;

        let scope_name = req.scope_name.trim().to_string();
        let runner_group = req
            .runner_group
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string);
        let labels = req.label_set();

        info!(
            "Creating {} runner(s) for {} {}",
            names.len(),
            req.scope,
            scope_name
        );

        let mut created = Vec::with_capacity(names.len());
        for name in names {
            let runner = Runner::new(
                name,
                req.scope,
                scope_name.clone(),
                runner_group.clone(),
                labels.clone(),
            );
            let runner_id = runner.id.clone();

            if !self.registry.put(runner) {
                return Err(OrchestratorError::Validation(format!(
                    "runner id {} already registered",
                    runner_id
                )));
            }

            self.tasks
                .spawn(self.provisioner.clone().provision(runner_id.clone()));

            created.push(CreatedRunner {
                runner_id,
                status: RunnerStatus::Creating,
                message: "Runner creation started".to_string(),
            });
        }

        Ok(created)
    }

    pub fn get(&self, id: &str) -> Result<RunnerSummary> {
        self.registry
            .get(id)
            .map(RunnerSummary::from)
            .ok_or_else(|| OrchestratorError::NotFound(format!("runner {}", id)))
    }

    pub fn list(&self) -> Vec<RunnerSummary> {
        self.registry
            .list()
            .into_iter()
            .map(RunnerSummary::from)
            .collect()
    }

    /// Last `tail` lines of a runner's container output
    ///
    /// `runner` is a runner id or runner name. Fails with `NotFound` when no such
    /// runner exists or it has no container yet.
    pub async fn logs(&self, runner: &str, tail: usize) -> Result<RunnerLogs> {
        let found = self
            .registry
            .get(runner)
            .or_else(|| {
                self.registry
                    .list()
                    .into_iter()
                    .find(|r| r.runner_name == runner)
            })
            .ok_or_else(|| OrchestratorError::NotFound(format!("runner {}", runner)))?;

        let container = found.container_ref.as_deref().ok_or_else(|| {
            OrchestratorError::NotFound(format!("container of runner {}", found.runner_name))
        })?;

        let logs = self.containers.logs(container, tail).await?;
        Ok(RunnerLogs {
            runner_id: found.id.clone(),
            runner_name: found.runner_name.clone(),
            tail,
            logs,
        })
    }

    /// Identifier stamped on the containers this process manages
    pub fn orchestrator_id(&self) -> &str {
        self.containers.orchestrator_id()
    }

    /// Destroys a runner and its container
    ///
    /// Idempotent: an unknown runner, or one another caller is already tearing
    /// down, yields `destroyed: false`.
    pub async fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        let claimed = loop {
            let Some(runner) = self.registry.get(id) else {
                return Ok(DeleteOutcome { destroyed: false });
            };

            if matches!(
                runner.status,
                RunnerStatus::Destroying | RunnerStatus::Destroyed
            ) {
                debug!("Runner {} is already being destroyed", id);
                return Ok(DeleteOutcome { destroyed: false });
            }

            if self
                .registry
                .compare_and_set(id, runner.status, RunnerStatus::Destroying)
            {
                break runner;
            }
        };

        info!("Deleting runner {} ({})", id, claimed.runner_name);

        if let Some(container) = &claimed.container_ref {
            if let Err(e) = self.containers.destroy(container).await {
                warn!(
                    "Failed to destroy container {} of runner {}, leaving it to the sweeper: {}",
                    container, id, e
                );
                return Err(e);
            }
        }

        self.registry
            .compare_and_set(id, RunnerStatus::Destroying, RunnerStatus::Destroyed);
        self.registry.remove(id);

        info!("Runner deleted: {}", id);
        Ok(DeleteOutcome { destroyed: true })
    }

    /// Runs one cleanup pass
    pub async fn cleanup(&self) -> CleanupReport {
        let cleaned = self.sweeper.sweep_once(&self.provisioner.shutdown).await;
        CleanupReport::from_ids(cleaned)
    }

    pub async fn health(&self) -> HealthReport {
        let active_runner_count = self.registry.count_where(|r| r.status.is_active());
        let mut problems = Vec::new();

        if let Err(e) = self.containers.ping().await {
            problems.push(format!("container runtime does not answer: {}", e));
        }

        if active_runner_count > MAX_HEALTHY_ACTIVE_RUNNERS {
            problems.push(format!(
                "{} active runners exceeds {}",
                active_runner_count, MAX_HEALTHY_ACTIVE_RUNNERS
            ));
        }

        HealthReport {
            status: if problems.is_empty() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            active_runner_count,
            auto_create_runners: self.auto_create_runners,
            problems,
        }
    }

    /// Rebuilds runner records for labelled containers left by a previous process
    ///
    /// Containers whose labels do not describe a runner are removed. Returns the
    /// number of adopted runners.
    pub async fn adopt_orphans(&self) -> Result<usize> {
        let containers = self.containers.list_managed().await?;
        let mut adopted = 0;

        for container in containers {
            match runner_from_container(&container) {
                Some(runner) => {
                    let id = runner.id.clone();
                    if self.registry.put(runner) {
                        info!(
                            "Adopted runner {} from container {}",
                            id,
                            short(&container.id)
                        );
                        adopted += 1;
                    }
                }
                None => {
                    warn!(
                        "Container {} has unreadable labels, removing it",
                        short(&container.id)
                    );
                    if let Err(e) = self.containers.destroy(&container.id).await {
                        warn!("Failed to remove container {}: {}", short(&container.id), e);
                    }
                }
            }
        }

        Ok(adopted)
    }
}

/// Background provisioning of `Creating` runners
#[derive(Clone)]
struct Provisioner {
    registry: Arc<RunnerRegistry>,
    issuer: Arc<CredentialIssuer>,
    containers: Arc<ContainerManager>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl Provisioner {
    async fn provision(self, runner_id: String) {
        let _permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.registry.fail(&runner_id, "creation permits closed");
                    return;
                }
            },
            _ = self.shutdown.cancelled() => {
                self.registry.fail(&runner_id, OrchestratorError::ShuttingDown.to_string());
                return;
            }
        };

        if let Err(e) = self.try_provision(&runner_id).await {
            warn!("Provisioning runner {} failed: {}", runner_id, e);
            self.registry.fail(&runner_id, e.to_string());
        }
    }

    async fn try_provision(&self, runner_id: &str) -> Result<()> {
        let Some(runner) = self
            .registry
            .get(runner_id)
            .filter(|r| r.status == RunnerStatus::Creating)
        else {
            debug!("Runner {} left Creating before provisioning started", runner_id);
            return Ok(());
        };

        let credential = self.issuer.issue(runner.scope, &runner.scope_name).await?;
        if !self
            .registry
            .record_fingerprint(runner_id, credential.fingerprint())
        {
            debug!("Runner {} was deleted while its credential was issued", runner_id);
            return Ok(());
        }

        let container_id = self.containers.create(&runner, &credential).await?;

        if self.shutdown.is_cancelled() {
            info!(
                "Shutdown signalled while creating runner {}, removing container {}",
                runner_id,
                short(&container_id)
            );
            self.discard(&container_id).await;
            return Err(OrchestratorError::ShuttingDown);
        }

        if !self.registry.attach_container(runner_id, &container_id) {
            info!(
                "Runner {} left Creating while its container was created, removing container {}",
                runner_id,
                short(&container_id)
            );
            self.discard(&container_id).await;
            return Ok(());
        }

        info!(
            "Runner {} ({}) started in container {}",
            runner_id,
            runner.runner_name,
            short(&container_id)
        );
        Ok(())
    }

    async fn discard(&self, container_id: &str) {
        if let Err(e) = self.containers.destroy(container_id).await {
            warn!("Failed to remove container {}: {}", short(container_id), e);
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_create_request(req: &CreateRunners) -> Result<()> {
    req.scope
        .validate_name(&req.scope_name)
        .map_err(OrchestratorError::Validation)?;

    if !(MIN_RUNNER_COUNT..=MAX_RUNNER_COUNT).contains(&req.count) {
        return Err(OrchestratorError::Validation(format!(
            "count must be between {} and {}, got {}",
            MIN_RUNNER_COUNT, MAX_RUNNER_COUNT, req.count
        )));
    }

    Ok(())
}

/// Keeps `[A-Za-z0-9_-]` and caps the length
pub fn sanitize_runner_name(name: &str) -> Result<String> {
    let clean: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_RUNNER_NAME_LEN)
        .collect();

    if clean.is_empty() {
        return Err(OrchestratorError::Validation(format!(
            "runner_name '{}' has no valid characters",
            name
        )));
    }

    Ok(clean)
}

/// Names for `count` runners
///
/// Without a base name every runner gets `ephemeral-runner-<8 hex>`. With a base
/// name and `count > 1`, runners are named `<name>-1`, `<name>-2`, ...
fn runner_names(base: Option<&str>, count: u32) -> Result<Vec<String>> {
    let Some(base) = base.filter(|b| !b.trim().is_empty()) else {
        return Ok((0..count)
            .map(|_| {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("ephemeral-runner-{}", &id[..8])
            })
            .collect());
    };

    let base = sanitize_runner_name(base)?;
    if count == 1 {
        return Ok(vec![base]);
    }

    Ok((1..=count)
        .map(|i| {
            let suffix = format!("-{}", i);
            let keep = MAX_RUNNER_NAME_LEN - suffix.len();
            let stem: String = base.chars().take(keep).collect();
            format!("{}{}", stem, suffix)
        })
        .collect())
}

fn runner_from_container(container: &ManagedContainer) -> Option<Runner> {
    let label = |key: &str| {
        container
            .labels
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    };

    let id = label(labels::RUNNER_ID)?;
    let runner_name = label(labels::RUNNER_NAME)?;
    let scope: Scope = label(labels::SCOPE)?.parse().ok()?;
    let scope_name = label(labels::SCOPE_NAME)?;
    scope.validate_name(scope_name).ok()?;

    let runner_labels: BTreeSet<String> = label(labels::LABELS)
        .map(|joined| {
            joined
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let now = Utc::now();
    Some(Runner {
        id: id.to_string(),
        runner_name: runner_name.to_string(),
        scope,
        scope_name: scope_name.to_string(),
        runner_group: None,
        status: if container.state.running {
            RunnerStatus::Running
        } else {
            RunnerStatus::Completing
        },
        container_ref: Some(container.id.clone()),
        labels: runner_labels,
        created_at: now,
        last_seen_at: now,
        credential_fingerprint: label(labels::CREDENTIAL).map(str::to_string),
        error: None,
    })
}

fn short(container_id: &str) -> &str {
    container_id.get(..12).unwrap_or(container_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;
    use crate::runtime::ContainerState;
    use crate::testing::{harness, harness_with};
    use std::collections::{BTreeMap, HashSet};
    use std::time::Duration;

    fn request(scope: Scope, scope_name: &str, count: u32) -> CreateRunners {
        let mut req = CreateRunners::single(scope, scope_name);
        req.count = count;
        req
    }

    #[tokio::test]
    async fn test_create_rejects_repo_scope_without_owner() {
        let h = harness();
        let err = h
            .service
            .create(request(Scope::Repository, "acme", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(h.service.list().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_count() {
        let h = harness();
        for count in [0, 11] {
            let err = h
                .service
                .create(request(Scope::Repository, "acme/app", count))
                .await
                .unwrap_err();
            assert!(matches!(err, OrchestratorError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn test_create_two_runners() {
        let h = harness();
        let created = h
            .service
            .create(request(Scope::Repository, "acme/app", 2))
            .await
            .unwrap();

        assert_eq!(created.len(), 2);
        assert_ne!(created[0].runner_id, created[1].runner_id);
        assert!(created.iter().all(|c| c.status == RunnerStatus::Creating));

        h.settle().await;
        for c in &created {
            let summary = h.service.get(&c.runner_id).unwrap();
            assert_eq!(summary.scope_name, "acme/app");
            assert_eq!(summary.status, RunnerStatus::Registering);
            assert!(summary.container_id.is_some());
        }
        assert_eq!(h.runtime.container_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_creates_share_one_issuance() {
        let h = harness_with(
            FakePlatform::new().with_issue_delay(Duration::from_millis(100)),
            Config::new("t", "runner:latest"),
        );

        let mut handles = Vec::new();
        for _ in 0..5 {
            let service = Arc::clone(&h.service);
            handles.push(tokio::spawn(async move {
                service.create(request(Scope::Repository, "acme/app", 1)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        h.settle().await;

        assert_eq!(h.platform.max_in_flight(), 1);
        assert_eq!(h.runtime.container_ids().len(), 5);
    }

    #[tokio::test]
    async fn test_named_runners_get_suffixes() {
        let h = harness();
        let mut req = request(Scope::Organization, "acme", 3);
        req.runner_name = Some("build box!".to_string());
        h.service.create(req).await.unwrap();

        let names: HashSet<_> = h.service.list().into_iter().map(|s| s.runner_name).collect();
        assert_eq!(
            names,
            HashSet::from([
                "buildbox-1".to_string(),
                "buildbox-2".to_string(),
                "buildbox-3".to_string()
            ])
        );
        h.settle().await;
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let h = harness();
        assert!(h.service.get("nope").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let h = harness();
        let created = h
            .service
            .create(request(Scope::Repository, "acme/app", 1))
            .await
            .unwrap();
        h.settle().await;
        let id = &created[0].runner_id;

        assert_eq!(h.service.delete(id).await.unwrap(), DeleteOutcome { destroyed: true });
        assert_eq!(h.service.delete(id).await.unwrap(), DeleteOutcome { destroyed: false });
        assert_eq!(
            h.service.delete("never-existed").await.unwrap(),
            DeleteOutcome { destroyed: false }
        );
        assert!(h.runtime.container_ids().is_empty());
        assert!(h.service.get(id).is_err());
    }

    #[tokio::test]
    async fn test_delete_during_provisioning_destroys_new_container() {
        let h = harness();
        h.runtime.set_create_delay(Duration::from_millis(100));

        let created = h
            .service
            .create(request(Scope::Repository, "acme/app", 1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let outcome = h.service.delete(&created[0].runner_id).await.unwrap();
        assert!(outcome.destroyed);

        h.settle().await;
        assert!(h.service.list().is_empty());
        assert!(h.runtime.container_ids().is_empty());
    }

    #[tokio::test]
    async fn test_provisioning_failure_marks_error() {
        let h = harness();
        h.runtime
            .fail_creates(vec![OrchestratorError::ImagePull("manifest unknown".to_string())]);

        let created = h
            .service
            .create(request(Scope::Repository, "acme/app", 1))
            .await
            .unwrap();
        h.settle().await;

        let summary = h.service.get(&created[0].runner_id).unwrap();
        assert_eq!(summary.status, RunnerStatus::Error);
        assert!(summary.error.unwrap().contains("manifest unknown"));
    }

    #[tokio::test]
    async fn test_create_after_shutdown_is_refused() {
        let h = harness();
        h.shutdown.cancel();
        let err = h
            .service
            .create(request(Scope::Repository, "acme/app", 1))
            .await
            .unwrap_err();
        assert_eq!(err, OrchestratorError::ShuttingDown);
    }

    #[tokio::test]
    async fn test_shutdown_during_create_removes_container() {
        let h = harness();
        h.runtime.set_create_delay(Duration::from_millis(100));

        h.service
            .create(request(Scope::Repository, "acme/app", 1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.shutdown.cancel();
        h.settle().await;

        assert!(h.runtime.container_ids().is_empty());
        assert!(h.service.list().iter().all(|s| s.status == RunnerStatus::Error));
    }

    #[tokio::test]
    async fn test_logs_by_id_or_name() {
        let h = harness();
        let mut req = request(Scope::Repository, "acme/app", 1);
        req.runner_name = Some("builder".to_string());
        let created = h.service.create(req).await.unwrap();
        h.settle().await;

        let id = &created[0].runner_id;
        let container = h.registry.get(id).unwrap().container_ref.unwrap();
        h.runtime.set_logs(&container, "Listening for Jobs\n");

        let by_id = h.service.logs(id, DEFAULT_LOG_TAIL).await.unwrap();
        assert_eq!(by_id.runner_name, "builder");
        assert_eq!(by_id.logs, "Listening for Jobs\n");

        let by_name = h.service.logs("builder", DEFAULT_LOG_TAIL).await.unwrap();
        assert_eq!(&by_name.runner_id, id);
        assert_eq!(by_name.tail, 200);
    }

    #[tokio::test]
    async fn test_logs_without_container_is_not_found() {
        let h = harness();
        h.runtime.set_create_delay(Duration::from_millis(100));
        let created = h
            .service
            .create(request(Scope::Repository, "acme/app", 1))
            .await
            .unwrap();

        let err = h.service.logs(&created[0].runner_id, 10).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(h.service.logs("unknown", 10).await.unwrap_err().is_not_found());
        h.settle().await;
    }

    #[tokio::test]
    async fn test_cleanup_with_no_runners() {
        let h = harness();
        let report = h.service.cleanup().await;
        assert_eq!(report.cleaned_count, 0);
        assert!(report.cleaned_ids.is_empty());

        let again = h.service.cleanup().await;
        assert_eq!(again, report);
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let report = h.service.health().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.active_runner_count, 0);
        assert!(!report.auto_create_runners);

        h.runtime.set_unavailable(true);
        let report = h.service.health().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.problems.len(), 1);
    }

    #[tokio::test]
    async fn test_adopt_orphans() {
        let h = harness();

        let mut good = BTreeMap::new();
        good.insert(labels::MANAGED.to_string(), "true".to_string());
        good.insert(labels::RUNNER_ID.to_string(), "runner-1".to_string());
        good.insert(labels::RUNNER_NAME.to_string(), "ephemeral-runner-1".to_string());
        good.insert(labels::SCOPE.to_string(), "repo".to_string());
        good.insert(labels::SCOPE_NAME.to_string(), "acme/app".to_string());
        good.insert(labels::LABELS.to_string(), "linux,x64".to_string());
        h.runtime.insert("c-good", good, ContainerState::running());

        let mut broken = BTreeMap::new();
        broken.insert(labels::MANAGED.to_string(), "true".to_string());
        h.runtime.insert("c-broken", broken, ContainerState::exited(0));

        assert_eq!(h.service.adopt_orphans().await.unwrap(), 1);

        let adopted = h.service.get("runner-1").unwrap();
        assert_eq!(adopted.status, RunnerStatus::Running);
        assert_eq!(adopted.scope_name, "acme/app");
        assert_eq!(adopted.labels.len(), 2);
        assert_eq!(h.runtime.container_ids(), vec!["c-good".to_string()]);
    }

    #[test]
    fn test_sanitize_runner_name() {
        assert_eq!(sanitize_runner_name("my runner#1").unwrap(), "myrunner1");
        assert!(sanitize_runner_name("!!!").is_err());
        assert_eq!(sanitize_runner_name(&"a".repeat(100)).unwrap().len(), 64);
    }

    #[test]
    fn test_default_runner_names() {
        let names = runner_names(None, 3).unwrap();
        assert_eq!(names.len(), 3);
        for name in &names {
            assert!(name.starts_with("ephemeral-runner-"));
            assert_eq!(name.len(), "ephemeral-runner-".len() + 8);
        }

        let long = runner_names(Some(&"x".repeat(64)), 10).unwrap();
        assert!(long.iter().all(|n| n.len() <= MAX_RUNNER_NAME_LEN));
        assert!(long[9].ends_with("-10"));
    }
}
