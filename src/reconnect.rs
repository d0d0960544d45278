//! Managed reconnection with exponential backoff.
//!
//! [`ReconnectController`] drives repeated connection attempts: each attempt
//! is bounded by a timeout, failures are followed by a growing delay, and the
//! retry count resets once an attempt succeeds. Dropping the future returned
//! by [`ReconnectController::run`] cancels a pending delay.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound for the retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default time allowed for a single attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(12);

/// Backoff and timeout settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Retries allowed after the first failed attempt.
    pub max_retries: u32,
    /// Time allowed for a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Sets the base delay.
    #[must_use]
    pub const fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the retry limit.
    #[must_use]
    pub const fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub const fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Delay before retry number `retry` (1-based): `min(base * 2^(retry-1), max)`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Runs connection attempts under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct ReconnectController {
    policy: RetryPolicy,
    retry_count: u32,
}

impl ReconnectController {
    /// Creates a controller with the given policy.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retry_count: 0,
        }
    }

    /// Returns the policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retries performed since the last success.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Calls `attempt` until it succeeds or the retries are exhausted.
    ///
    /// `attempt` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] wrapping the last failure once
    /// `max_retries` retries have failed.
    pub async fn run<T, F, Fut>(&mut self, mut attempt: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry_count = 0;

        loop {
            let number = self.retry_count + 1;
            let timeout = self.policy.attempt_timeout;
            let result = match tokio::time::timeout(timeout, attempt(number)).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(timeout)),
            };

            match result {
                Ok(value) => {
                    if self.retry_count > 0 {
                        tracing::info!("connected after {} retries", self.retry_count);
                    }
                    self.retry_count = 0;
                    return Ok(value);
                }
                Err(e) if self.retry_count >= self.policy.max_retries => {
                    tracing::warn!("giving up after {} attempts: {}", number, e);
                    self.retry_count = 0;
                    return Err(Error::connection(
                        format!("connection failed after {number} attempts: {e}"),
                        e,
                    ));
                }
                Err(e) => {
                    self.retry_count += 1;
                    let delay = self.policy.delay_for(self.retry_count);
                    tracing::warn!(
                        "connection attempt {} failed: {}; retrying in {:?}",
                        number,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
