//! Retry with truncated exponential backoff and full jitter.
//!
//! Only transient failures are retried: connection errors, timeouts and
//! HTTP 429/500/502/503/504. Everything else is returned on first sight.

use crate::errors::{CloudError, CloudResult, TransportError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry configuration for exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Backoff cap for the first retry.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(32),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> CloudResult<()> {
        if self.max_attempts == 0 {
            return Err(CloudError::configuration("max_attempts must be at least 1"));
        }
        if self.multiplier < 1.0 {
            return Err(CloudError::configuration("retry multiplier must be >= 1.0"));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(CloudError::configuration(
                "max_backoff must not be smaller than initial_backoff",
            ));
        }
        Ok(())
    }

    /// Upper bound of the backoff before retry number `retry` (1-based).
    pub fn backoff_cap(&self, retry: u32) -> Duration {
        let exp = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let delay = self.initial_backoff.as_secs_f64() * exp;
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

/// Calculates the full-jitter backoff: uniform in `[0, cap]`.
pub fn calculate_backoff(retry: u32, config: &RetryConfig) -> Duration {
    let cap = config.backoff_cap(retry).as_secs_f64();
    if cap <= 0.0 {
        return Duration::ZERO;
    }
    let delay = rand::thread_rng().gen_range(0.0..=cap);
    Duration::from_secs_f64(delay)
}

/// Retry executor with exponential backoff.
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Creates a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Executes an operation with retry logic.
    ///
    /// The token is checked before every attempt and interrupts backoff
    /// sleeps; an attempt already in flight is never interrupted.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> CloudResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CloudResult<T>>,
    {
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled.into());
            }

            attempt += 1;
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "request succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(error) if error.is_retryable() && attempt < self.config.max_attempts => {
                    let backoff = error
                        .retry_after()
                        .map(|hint| hint.min(self.config.max_backoff))
                        .unwrap_or_else(|| calculate_backoff(attempt, &self.config));

                    tracing::warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %error,
                        ?backoff,
                        "retryable error, backing off"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return Err(TransportError::Cancelled.into()),
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }
}
