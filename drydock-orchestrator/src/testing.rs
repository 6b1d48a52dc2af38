//! Test wiring: a runner service over the in-memory platform and runtime

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::platform::fake::FakePlatform;
use crate::retry::RetryPolicy;
use crate::runtime::fake::FakeRuntime;
use crate::scheduler::CleanupSweeper;
use crate::service::{ContainerManager, CredentialIssuer, RunnerRegistry, RunnerService};

pub struct Harness {
    pub service: Arc<RunnerService>,
    pub registry: Arc<RunnerRegistry>,
    pub sweeper: Arc<CleanupSweeper>,
    pub platform: Arc<FakePlatform>,
    pub runtime: Arc<FakeRuntime>,
    pub config: Config,
    pub tasks: TaskTracker,
    pub shutdown: CancellationToken,
}

impl Harness {
    /// Waits until every spawned provisioning task has finished
    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

pub fn harness() -> Harness {
    harness_with(FakePlatform::new(), Config::new("t", "runner:latest"))
}

pub fn harness_with(platform: FakePlatform, config: Config) -> Harness {
    let platform = Arc::new(platform);
    let runtime = Arc::new(FakeRuntime::new());
    let registry = Arc::new(RunnerRegistry::new());
    let issuer = Arc::new(CredentialIssuer::with_policy(
        platform.clone(),
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)),
    ));
    let containers = Arc::new(ContainerManager::new(runtime.clone(), &config));
    let sweeper = Arc::new(CleanupSweeper::new(
        &config,
        Arc::clone(&registry),
        Arc::clone(&containers),
    ));
    let tasks = TaskTracker::new();
    let shutdown = CancellationToken::new();

    let service = Arc::new(RunnerService::new(
        &config,
        Arc::clone(&registry),
        issuer,
        Arc::clone(&containers),
        Arc::clone(&sweeper),
        tasks.clone(),
        shutdown.clone(),
    ));

    Harness {
        service,
        registry,
        sweeper,
        platform,
        runtime,
        config,
        tasks,
        shutdown,
    }
}
