//! Credential issuer
//!
//! Requests registration credentials from the platform with request coalescing:
//! while an issuance for a `(scope, scope_name)` is in flight, further callers for
//! the same key wait for that call's result instead of starting their own.
//!
//! ```text
//! create A ─┐
//!           │                                Platform
//! create B ─┼──► CredentialIssuer ─────────► (one call)
//!           │          │                        │
//! create C ─┘          ▼                        ▼
//!               [A, B, C receive the same result]
//! ```

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use drydock_core::domain::runner::Scope;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::platform::{Credential, Platform};
use crate::retry::{RetryPolicy, retry};

type Key = (Scope, String);
type Shared = std::result::Result<Credential, OrchestratorError>;

enum Role {
    Leader(broadcast::Sender<Shared>),
    Waiter(broadcast::Receiver<Shared>),
}

/// Removes the in-flight entry when the leading call finishes or is dropped
///
/// Dropping the entry drops the sender, so waiters of an abandoned call are woken
/// with an error instead of waiting forever.
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<Key, broadcast::Sender<Shared>>,
    key: Key,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

pub struct CredentialIssuer {
    platform: Arc<dyn Platform>,
    policy: RetryPolicy,
    in_flight: DashMap<Key, broadcast::Sender<Shared>>,
}

impl CredentialIssuer {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self::with_policy(platform, RetryPolicy::rate_limit())
    }

    pub fn with_policy(platform: Arc<dyn Platform>, policy: RetryPolicy) -> Self {
        Self {
            platform,
            policy,
            in_flight: DashMap::new(),
        }
    }

    /// Issues a credential for `scope_name`, sharing any call already in flight
    ///
    /// Rate limiting is retried with backoff; timeouts and every other failure are
    /// returned as they are.
    pub async fn issue(&self, scope: Scope, scope_name: &str) -> Result<Credential> {
        let key = (scope, scope_name.to_string());

        let role = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => Role::Waiter(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _) = broadcast::channel(1);
                entry.insert(tx.clone());
                Role::Leader(tx)
            }
        };

        match role {
            Role::Leader(tx) => {
                let guard = InFlightGuard {
                    in_flight: &self.in_flight,
                    key,
                };

                let result = self.request(scope, scope_name).await;

                drop(guard);
                let waiters = tx.receiver_count();
                if waiters > 0 {
                    debug!(
                        "Sharing credential result for {} {} with {} waiter(s)",
                        scope, scope_name, waiters
                    );
                }
                let _ = tx.send(result.clone());

                result
            }
            Role::Waiter(mut rx) => {
                debug!(
                    "Credential issuance for {} {} already in flight, waiting",
                    scope, scope_name
                );
                rx.recv().await.unwrap_or_else(|_| {
                    Err(OrchestratorError::Platform(format!(
                        "credential issuance for {} was abandoned",
                        scope_name
                    )))
                })
            }
        }
    }

    async fn request(&self, scope: Scope, scope_name: &str) -> Result<Credential> {
        let operation = format!("issue credential for {} {}", scope, scope_name);
        let result = retry(&self.policy, &operation, OrchestratorError::is_rate_limited, || {
            self.platform.issue_registration_token(scope, scope_name)
        })
        .await;

        match &result {
            Ok(credential) => info!(
                "Issued credential {} for {} {} (expires: {})",
                credential.fingerprint(),
                scope,
                scope_name,
                credential
                    .expires_at()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string())
            ),
            Err(e) => warn!("Failed to issue credential for {} {}: {}", scope, scope_name, e),
        }

        result
    }

    /// Number of keys with an issuance in flight
    #[cfg(test)]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(4, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_concurrent_issuance_is_coalesced() {
        let platform = Arc::new(FakePlatform::new().with_issue_delay(Duration::from_millis(200)));
        let issuer = Arc::new(CredentialIssuer::with_policy(platform.clone(), fast_policy()));

        // Single-threaded runtime: all ten are spawned before any of them runs,
        // so nine park behind the first caller's platform call
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let issuer = Arc::clone(&issuer);
                tokio::spawn(async move { issuer.issue(Scope::Repository, "acme/app").await })
            })
            .collect();

        let mut fingerprints = Vec::new();
        for handle in handles {
            fingerprints.push(handle.await.unwrap().unwrap().fingerprint());
        }

        assert_eq!(platform.issue_calls(), 1);
        assert_eq!(platform.max_in_flight(), 1);
        assert_eq!(issuer.in_flight_count(), 0);
        assert!(fingerprints.iter().all(|f| *f == fingerprints[0]));
    }

    #[tokio::test]
    async fn test_late_caller_after_issuance_gets_fresh_credential() {
        let platform = Arc::new(FakePlatform::new());
        let issuer = CredentialIssuer::with_policy(platform.clone(), fast_policy());

        let first = issuer.issue(Scope::Repository, "acme/app").await.unwrap();
        let second = issuer.issue(Scope::Repository, "acme/app").await.unwrap();

        assert_eq!(platform.issue_calls(), 2);
        assert_ne!(first.fingerprint(), second.fingerprint());
    }

    #[tokio::test]
    async fn test_different_scopes_are_not_coalesced() {
        let platform = Arc::new(FakePlatform::new().with_issue_delay(Duration::from_millis(50)));
        let issuer = Arc::new(CredentialIssuer::with_policy(platform.clone(), fast_policy()));

        let a = {
            let issuer = Arc::clone(&issuer);
            tokio::spawn(async move { issuer.issue(Scope::Repository, "acme/app").await })
        };
        let b = {
            let issuer = Arc::clone(&issuer);
            tokio::spawn(async move { issuer.issue(Scope::Organization, "acme").await })
        };

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert_eq!(platform.issue_calls(), 2);
        assert_eq!(platform.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let platform = Arc::new(FakePlatform::new());
        platform.fail_issuance(vec![
            OrchestratorError::rate_limited("429"),
            OrchestratorError::rate_limited("429"),
        ]);
        let issuer = CredentialIssuer::with_policy(platform.clone(), fast_policy());

        assert!(issuer.issue(Scope::Repository, "acme/app").await.is_ok());
        assert_eq!(platform.issue_calls(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_surfaces() {
        let platform = Arc::new(FakePlatform::new());
        platform.fail_issuance(vec![OrchestratorError::rate_limited("429"); 4]);
        let issuer = CredentialIssuer::with_policy(platform.clone(), fast_policy());

        let err = issuer.issue(Scope::Repository, "acme/app").await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(platform.issue_calls(), 4);
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let platform = Arc::new(FakePlatform::new());
        platform.fail_issuance(vec![OrchestratorError::Timeout("api".to_string())]);
        let issuer = CredentialIssuer::with_policy(platform.clone(), fast_policy());

        let err = issuer.issue(Scope::Repository, "acme/app").await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(platform.issue_calls(), 1);
    }

    #[tokio::test]
    async fn test_waiters_of_abandoned_call_get_error() {
        let platform = Arc::new(FakePlatform::new().with_issue_delay(Duration::from_secs(5)));
        let issuer = Arc::new(CredentialIssuer::with_policy(platform.clone(), fast_policy()));

        let leader = {
            let issuer = Arc::clone(&issuer);
            tokio::spawn(async move { issuer.issue(Scope::Repository, "acme/app").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let waiter = {
            let issuer = Arc::clone(&issuer);
            tokio::spawn(async move { issuer.issue(Scope::Repository, "acme/app").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        leader.abort();
        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter hung")
            .unwrap();

        assert!(result.is_err());
        assert_eq!(issuer.in_flight_count(), 0);
    }
}
