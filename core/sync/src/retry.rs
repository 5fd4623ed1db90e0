//! Retry policy for queued writes and backoff for idempotent reads.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use embaixada_common::{Error, Result};

/// Failed attempts after which a queued operation is dropped.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Decides when a failing queued operation is given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures tolerated before eviction (the ceiling is inclusive).
    pub max_attempts: u32,
    /// Drop operations whose error is permanent after their first failure.
    pub evict_permanent: bool,
}

impl RetryPolicy {
    /// Create a policy with the given ceiling.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            evict_permanent: true,
        }
    }

    /// Treat every error as transient, consuming the full budget.
    pub fn without_classification(mut self) -> Self {
        self.evict_permanent = false;
        self
    }

    /// Whether an operation that has now failed `retry_count` times with
    /// `error` should leave the queue.
    pub fn should_evict(&self, retry_count: u32, error: &Error) -> bool {
        retry_count >= self.max_attempts || (self.evict_permanent && error.is_permanent())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

/// Configuration for in-call retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Calculate delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // +/- 25%
            let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Runs idempotent calls with exponential backoff on transient errors.
///
/// Only reads go through this; writes are retried across passes by the
/// sync queue instead, so a write is never replayed twice in one pass.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute an operation with retry logic.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !is_retryable(&err) {
                        return Err(err);
                    }

                    attempt += 1;
                    if attempt > self.config.max_retries {
                        warn!(
                            "Operation failed after {} attempts: {}",
                            attempt, err
                        );
                        return Err(err);
                    }

                    let delay = self.config.delay_for_attempt(attempt - 1);
                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}...",
                        attempt, err, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

/// Whether repeating the same call immediately may succeed.
pub fn is_retryable(err: &Error) -> bool {
    matches!(err, Error::Network(_) | Error::Server(_) | Error::Io(_))
}
