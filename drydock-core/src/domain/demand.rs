//! Demand domain types
//!
//! A demand snapshot is built fresh on every reconciliation tick and dropped
//! afterwards.

use serde::{Deserialize, Serialize};

use crate::domain::runner::Scope;

/// Queued work observed for one scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demand {
    pub scope: Scope,
    pub scope_name: String,
    pub queued_jobs: u32,
}

/// Demand observed during one reconciliation tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandSnapshot {
    entries: Vec<Demand>,
}

impl DemandSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records demand for a scope, replacing any earlier entry for it
    pub fn record(&mut self, scope: Scope, scope_name: impl Into<String>, queued_jobs: u32) {
        let scope_name = scope_name.into();
        self.entries
            .retain(|d| !(d.scope == scope && d.scope_name == scope_name));
        self.entries.push(Demand {
            scope,
            scope_name,
            queued_jobs,
        });
    }

    /// Entries with at least one queued job
    pub fn pending(&self) -> impl Iterator<Item = &Demand> {
        self.entries.iter().filter(|d| d.queued_jobs > 0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total queued jobs across all scopes
    pub fn total_queued(&self) -> u64 {
        self.entries.iter().map(|d| u64::from(d.queued_jobs)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_replaces_existing_entry() {
        let mut snapshot = DemandSnapshot::new();
        snapshot.record(Scope::Repository, "acme/app", 2);
        snapshot.record(Scope::Repository, "acme/app", 5);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.total_queued(), 5);
    }

    #[test]
    fn test_pending_skips_idle_scopes() {
        let mut snapshot = DemandSnapshot::new();
        snapshot.record(Scope::Repository, "acme/app", 0);
        snapshot.record(Scope::Repository, "acme/api", 3);

        let pending: Vec<_> = snapshot.pending().map(|d| d.scope_name.as_str()).collect();
        assert_eq!(pending, vec!["acme/api"]);
    }
}
