//! Retry utilities for optimistic-concurrency writes and reconcile error backoff.
//!
//! `retry_on_conflict` re-runs a whole read-modify-write cycle when the API server
//! rejects a write with 409 Conflict, with exponential backoff and jitter, up to a
//! bounded number of attempts. Every other error is returned on the first failure.
//!
//! `ErrorBackoff` tracks consecutive reconcile failures per object so the
//! controller's error policy can requeue with an exponentially growing delay.

use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tracing::{debug, warn};

use crate::tasks::types::{is_conflict, Error, Result};

/// Retry budget for conflicting writes
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first conflict
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each conflict
    pub backoff_multiplier: f64,
    /// Up to this fraction of the delay is added as random jitter
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(10),
            backoff_multiplier: 5.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..self.jitter);
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }
}

/// Run `operation` until it succeeds, fails with a non-conflict error, or the
/// conflict budget is spent.
///
/// `operation` must perform the full read-mutate-write cycle so each attempt works
/// on the latest resourceVersion.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    object_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(Error::KubeError(e)) if is_conflict(&e) => {
                if attempt >= max_attempts {
                    warn!(
                        object = %object_name,
                        attempts = attempt,
                        "Write still conflicting after max retries"
                    );
                    return Err(Error::ConflictRetriesExhausted {
                        name: object_name.to_string(),
                        attempts: attempt,
                    });
                }

                let wait = config.jittered(delay);
                debug!(
                    object = %object_name,
                    attempt = attempt,
                    delay_ms = wait.as_millis(),
                    "resourceVersion conflict, retrying with latest object"
                );
                tokio::time::sleep(wait).await;

                let next = delay.as_secs_f64() * config.backoff_multiplier;
                delay = Duration::try_from_secs_f64(next).unwrap_or(Duration::MAX);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Per-object exponential requeue delay for failed reconciliations
#[derive(Debug)]
pub struct ErrorBackoff {
    base: Duration,
    max: Duration,
    failures: DashMap<String, u32>,
}

impl Default for ErrorBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(1000))
    }
}

impl ErrorBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: DashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut entry = self.failures.entry(key.to_string()).or_insert(0);
        let exponent = (*entry).min(31);
        *entry = entry.saturating_add(1);

        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    /// Forget failures for `key` after a successful reconcile
    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    #[must_use]
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map_or(0, |entry| *entry)
    }
}
