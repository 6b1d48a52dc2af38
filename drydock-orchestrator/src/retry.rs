//! Bounded retry with exponential backoff

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};

/// Longest server-requested wait a retry loop sleeps through; anything longer
/// surfaces the error instead
pub const MAX_SERVER_WAIT: Duration = Duration::from_secs(60);

/// How often and how patiently an operation is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
        }
    }

    /// Policy used when the platform reports rate limiting
    pub const fn rate_limit() -> Self {
        Self::new(4, Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Delay before attempt `attempt + 1`, doubling from the initial delay up to the cap
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::rate_limit()
    }
}

/// Runs `f` until it succeeds, fails with an error `should_retry` rejects, or the
/// policy runs out of attempts
///
/// A server-requested wait carried by the error is the floor of the backoff.
pub async fn retry<T, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    should_retry: P,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&OrchestratorError) -> bool,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded after {} attempt(s)", operation, attempt);
                }
                return Ok(value);
            }
            Err(e) if should_retry(&e) && attempt < policy.max_attempts => {
                let delay = match e.retry_after() {
                    Some(wait) if wait > MAX_SERVER_WAIT => {
                        warn!(
                            "{} failed: {}. Server asks to wait {:?}, giving up",
                            operation, e, wait
                        );
                        return Err(e);
                    }
                    Some(wait) => policy.delay_after(attempt).max(wait),
                    None => policy.delay_after(attempt),
                };
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    operation, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if attempt > 1 {
                    warn!("{} failed after {} attempt(s): {}", operation, attempt, e);
                }
                return Err(e);
            }
        }
    }
}
