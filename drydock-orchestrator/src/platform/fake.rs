//! In-memory platform for tests

use async_trait::async_trait;
use drydock_core::domain::runner::Scope;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Credential, Platform, WorkflowFile};
use crate::config::DiscoveryMode;
use crate::error::{OrchestratorError, Result};

pub const SELF_HOSTED_WORKFLOW: &str = r#"
name: ci
on: [push]
jobs:
  build:
    runs-on: self-hosted
    steps:
      - run: make
"#;

pub const HOSTED_WORKFLOW: &str = r#"
name: ci
on: [push]
jobs:
  build:
    runs-on: ubuntu-latest
"#;

/// Scripted platform that counts issuance calls
#[derive(Default)]
pub struct FakePlatform {
    pub issue_delay: Duration,
    issue_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    issue_failures: Mutex<Vec<OrchestratorError>>,
    repositories: Mutex<Vec<String>>,
    workflows: Mutex<HashMap<String, Vec<WorkflowFile>>>,
    queued: Mutex<HashMap<String, u32>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_issue_delay(mut self, delay: Duration) -> Self {
        self.issue_delay = delay;
        self
    }

    /// Makes the next issuance calls fail with `errors`, in order
    pub fn fail_issuance(&self, errors: Vec<OrchestratorError>) {
        let mut failures = self.issue_failures.lock().unwrap();
        *failures = errors;
        failures.reverse();
    }

    /// Adds a repository with one workflow and a queued run count
    pub fn add_repository(&self, full_name: &str, workflow: &str, queued: u32) {
        self.repositories.lock().unwrap().push(full_name.to_string());
        self.workflows.lock().unwrap().insert(
            full_name.to_string(),
            vec![WorkflowFile {
                name: "ci.yml".to_string(),
                content: workflow.to_string(),
            }],
        );
        self.queued
            .lock()
            .unwrap()
            .insert(full_name.to_string(), queued);
    }

    pub fn issue_calls(&self) -> usize {
        self.issue_calls.load(Ordering::SeqCst)
    }

    /// Largest number of issuance calls observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn issue_registration_token(&self, _scope: Scope, scope_name: &str) -> Result<Credential> {
        let n = self.issue_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.issue_delay.is_zero() {
            tokio::time::sleep(self.issue_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.issue_failures.lock().unwrap().pop() {
            return Err(err);
        }

        Ok(Credential::new(format!("TOKEN-{}-{}", scope_name, n), None))
    }

    async fn list_repositories(
        &self,
        _mode: DiscoveryMode,
        _organization: Option<&str>,
    ) -> Result<Vec<String>> {
        Ok(self.repositories.lock().unwrap().clone())
    }

    async fn get_workflows(&self, repo_full_name: &str) -> Result<Vec<WorkflowFile>> {
        Ok(self
            .workflows
            .lock()
            .unwrap()
            .get(repo_full_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_queued_job_count(&self, repo_full_name: &str) -> Result<u32> {
        self.queued
            .lock()
            .unwrap()
            .get(repo_full_name)
            .copied()
            .ok_or_else(|| OrchestratorError::ScopeNotFound(repo_full_name.to_string()))
    }
}
