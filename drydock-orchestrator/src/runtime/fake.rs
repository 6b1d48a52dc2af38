//! In-memory container runtime for tests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{ContainerRuntime, ContainerSpec, ContainerState, ManagedContainer};
use crate::error::{OrchestratorError, Result};

struct FakeContainer {
    name: String,
    spec: ContainerSpec,
    state: ContainerState,
    logs: String,
}

/// Runtime whose containers are entries in a map
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, FakeContainer>>,
    next_id: AtomicUsize,
    create_failures: Mutex<Vec<OrchestratorError>>,
    create_delay: Mutex<Duration>,
    removed: Mutex<Vec<String>>,
    unavailable: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next create calls fail with `errors`, in order
    pub fn fail_creates(&self, errors: Vec<OrchestratorError>) {
        let mut failures = self.create_failures.lock().unwrap();
        *failures = errors;
        failures.reverse();
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_state(&self, id: &str, state: ContainerState) {
        if let Some(container) = self.containers.lock().unwrap().get_mut(id) {
            container.state = state;
        }
    }

    /// Removes a container behind the orchestrator's back
    pub fn vanish(&self, id: &str) {
        self.containers.lock().unwrap().remove(id);
    }

    /// Inserts a container as if a previous process had created it
    pub fn insert(&self, id: &str, labels: BTreeMap<String, String>, state: ContainerState) {
        self.containers.lock().unwrap().insert(
            id.to_string(),
            FakeContainer {
                name: id.to_string(),
                spec: ContainerSpec {
                    name: id.to_string(),
                    image: "runner:latest".to_string(),
                    env: Vec::new(),
                    labels,
                    command: None,
                },
                state,
                logs: String::new(),
            },
        );
    }

    /// Replaces the output a container reports
    pub fn set_logs(&self, id: &str, logs: &str) {
        if let Some(container) = self.containers.lock().unwrap().get_mut(id) {
            container.logs = logs.to_string();
        }
    }

    pub fn container_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.containers.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn spec(&self, id: &str) -> Option<ContainerSpec> {
        self.containers
            .lock()
            .unwrap()
            .get(id)
            .map(|c| c.spec.clone())
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OrchestratorError::RuntimeUnavailable(
                "fake runtime is down".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.check_available()?;

        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.create_failures.lock().unwrap().pop() {
            return Err(err);
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("{:012x}{:052x}", n + 1, 0);
        self.containers.lock().unwrap().insert(
            id.clone(),
            FakeContainer {
                name: spec.name.clone(),
                spec: spec.clone(),
                state: ContainerState::running(),
                logs: String::new(),
            },
        );

        Ok(id)
    }

    async fn inspect_container(&self, container_ref: &str) -> Result<ContainerState> {
        self.check_available()?;

        self.containers
            .lock()
            .unwrap()
            .get(container_ref)
            .map(|c| c.state)
            .ok_or_else(|| OrchestratorError::NotFound(container_ref.to_string()))
    }

    async fn remove_container(&self, container_ref: &str) -> Result<()> {
        self.check_available()?;

        let mut containers = self.containers.lock().unwrap();
        let key = containers
            .iter()
            .find(|(id, c)| id.as_str() == container_ref || c.name == container_ref)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| OrchestratorError::NotFound(container_ref.to_string()))?;

        containers.remove(&key);
        self.removed.lock().unwrap().push(key);
        Ok(())
    }

    async fn container_logs(&self, container_ref: &str, tail: usize) -> Result<String> {
        self.check_available()?;

        let containers = self.containers.lock().unwrap();
        let container = containers
            .iter()
            .find(|(id, c)| id.as_str() == container_ref || c.name == container_ref)
            .map(|(_, c)| c)
            .ok_or_else(|| OrchestratorError::NotFound(container_ref.to_string()))?;

        let lines: Vec<&str> = container.logs.lines().collect();
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..].iter().map(|l| format!("{}\n", l)).collect())
    }

    async fn list_managed_containers(&self) -> Result<Vec<ManagedContainer>> {
        self.check_available()?;

        let mut containers: Vec<_> = self
            .containers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, c)| ManagedContainer {
                id: id.clone(),
                state: c.state,
                labels: c.spec.labels.clone(),
            })
            .collect();
        containers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(containers)
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
