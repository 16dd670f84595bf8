//! Retry utilities with exponential backoff and jitter.
//!
//! [`retry_with_backoff`] retries an async operation in place, used for
//! startup work such as CRD installation. [`BackoffTracker`] keeps per-key
//! attempt counts so controller error policies can requeue failing objects
//! with growing delays and reset once they reconcile cleanly.
//!
//! # Example
//!
//! ```ignore
//! use cnb_common::retry::{retry_with_backoff, RetryConfig};
//!
//! let result = retry_with_backoff(
//!     &RetryConfig::with_max_attempts(5),
//!     "install_crds",
//!     || async { install(&client).await },
//! ).await?;
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{error, warn};

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Backoff used to requeue failed reconciles: 5s doubling up to 5m
    pub fn reconcile() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }

    /// Un-jittered delay before the given attempt (1-based), capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Scale a delay by a random factor between 0.5x and 1.5x
fn jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries indefinitely (or up to max_attempts if set) until success and
/// returns the last error once attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let delay = jitter(config.delay_for_attempt(attempt));
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Failure records idle for this many `max_delay`s are dropped
///
/// A failing object is requeued within `max_delay` (plus jitter), so a
/// record this stale belongs to an object that is no longer delivered,
/// typically because it was deleted.
const IDLE_FACTOR: u32 = 4;

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    attempts: u32,
    last_failure: Instant,
}

/// Per-key failure counter producing exponential requeue delays
#[derive(Debug)]
pub struct BackoffTracker {
    config: RetryConfig,
    attempts: Mutex<HashMap<String, FailureRecord>>,
}

impl BackoffTracker {
    /// Create a tracker using the given backoff shape
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure for `key` and return the jittered delay before the retry
    ///
    /// Records of other keys that have been idle too long are pruned here.
    pub fn next_delay(&self, key: &str) -> Duration {
        let now = Instant::now();
        let idle_after = self.config.max_delay * IDLE_FACTOR;
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
            attempts.retain(|_, record| now.duration_since(record.last_failure) < idle_after);
            let record = attempts.entry(key.to_string()).or_insert(FailureRecord {
                attempts: 0,
                last_failure: now,
            });
            record.attempts = record.attempts.saturating_add(1);
            record.last_failure = now;
            record.attempts
        };
        jitter(self.config.delay_for_attempt(attempt))
    }

    /// Longest delay this tracker hands out
    pub fn max_delay(&self) -> Duration {
        self.config.max_delay
    }

    /// Forget failures for `key` after it reconciled successfully or went away
    pub fn reset(&self, key: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Number of consecutive failures recorded for `key`
    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|record| record.attempts)
            .unwrap_or(0)
    }

    /// Number of keys with recorded failures
    pub fn tracked(&self) -> usize {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for BackoffTracker {
    fn default() -> Self {
        Self::new(RetryConfig::reconcile())
    }
}
