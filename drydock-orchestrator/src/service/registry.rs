//! Runner registry
//!
//! Authoritative in-process map of runner id to runner record. Every component
//! shares one `Arc<RunnerRegistry>`; scheduling-relevant status changes go through
//! [`RunnerRegistry::compare_and_set`] so concurrent writers cannot interleave.
//!
//! The lock is a plain `std::sync::RwLock` and is never held across an `.await`.

use chrono::Utc;
use drydock_core::domain::runner::{Runner, RunnerStatus};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Default)]
pub struct RunnerRegistry {
    runners: RwLock<HashMap<String, Runner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Runner>> {
        self.runners.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Runner>> {
        self.runners.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a runner; returns `false` (and changes nothing) if the id is taken
    pub fn put(&self, runner: Runner) -> bool {
        let mut runners = self.write();
        if runners.contains_key(&runner.id) {
            return false;
        }
        runners.insert(runner.id.clone(), runner);
        true
    }

    pub fn get(&self, id: &str) -> Option<Runner> {
        self.read().get(id).cloned()
    }

    /// Point-in-time copy of every runner, oldest first
    pub fn list(&self) -> Vec<Runner> {
        let mut runners: Vec<Runner> = self.read().values().cloned().collect();
        runners.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        runners
    }

    pub fn remove(&self, id: &str) -> Option<Runner> {
        self.write().remove(id)
    }

    /// Moves a runner from `expected` to `next`
    ///
    /// Returns `false` when the runner is gone, is not in `expected`, or the
    /// transition is not legal.
    pub fn compare_and_set(&self, id: &str, expected: RunnerStatus, next: RunnerStatus) -> bool {
        let mut runners = self.write();
        let Some(runner) = runners.get_mut(id) else {
            return false;
        };

        if runner.status != expected || !expected.can_transition_to(next) {
            return false;
        }

        debug!("Runner {}: {} -> {}", id, expected, next);
        runner.status = next;
        runner.last_seen_at = Utc::now();
        true
    }

    /// Records the container of a `Creating` runner and moves it to `Registering`
    pub fn attach_container(&self, id: &str, container_ref: &str) -> bool {
        let mut runners = self.write();
        let Some(runner) = runners.get_mut(id) else {
            return false;
        };

        if runner.status != RunnerStatus::Creating {
            return false;
        }

        runner.container_ref = Some(container_ref.to_string());
        runner.status = RunnerStatus::Registering;
        runner.last_seen_at = Utc::now();
        true
    }

    /// Moves a runner to `Error`, recording why
    pub fn fail(&self, id: &str, message: impl Into<String>) -> bool {
        let mut runners = self.write();
        let Some(runner) = runners.get_mut(id) else {
            return false;
        };

        if !runner.status.can_transition_to(RunnerStatus::Error) {
            return false;
        }

        runner.status = RunnerStatus::Error;
        runner.error = Some(message.into());
        true
    }

    /// Moves a runner from `expected` to `Error`, recording why
    ///
    /// Returns `false` when the runner is gone or has left `expected`.
    pub fn fail_if(&self, id: &str, expected: RunnerStatus, message: impl Into<String>) -> bool {
        let mut runners = self.write();
        let Some(runner) = runners.get_mut(id) else {
            return false;
        };

        if runner.status != expected || !expected.can_transition_to(RunnerStatus::Error) {
            return false;
        }

        debug!("Runner {}: {} -> {}", id, expected, RunnerStatus::Error);
        runner.status = RunnerStatus::Error;
        runner.error = Some(message.into());
        runner.last_seen_at = Utc::now();
        true
    }

    pub fn record_fingerprint(&self, id: &str, fingerprint: String) -> bool {
        match self.write().get_mut(id) {
            Some(runner) => {
                runner.credential_fingerprint = Some(fingerprint);
                true
            }
            None => false,
        }
    }

    /// Refreshes `last_seen_at`
    pub fn touch(&self, id: &str) -> bool {
        match self.write().get_mut(id) {
            Some(runner) => {
                runner.last_seen_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn count_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Runner) -> bool,
    {
        self.read().values().filter(|r| predicate(r)).count()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
