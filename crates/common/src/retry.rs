//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

/// Retry strategy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryStrategy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Cap applied to the exponential delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt. `1.0` gives a fixed delay.
    pub backoff_multiplier: f64,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryStrategy {
    /// Same delay between every attempt.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
        }
    }

    /// Doubles the delay after every failed attempt, capped at `max_delay`.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff_multiplier: 2.0,
        }
    }

    /// A strategy that never retries.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let millis = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let delay = if millis.is_finite() && millis < self.max_delay.as_millis() as f64 {
            Duration::from_millis(millis as u64)
        } else {
            self.max_delay
        };
        delay.min(self.max_delay)
    }
}

/// Failure returned by [`retry`].
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last_error: E },
    /// An attempt failed with an error the predicate refused to retry.
    Aborted(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Aborted(error) => error,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the strategy runs out of attempts.
pub async fn retry<T, E, F, Fut, P>(
    strategy: &RetryStrategy,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = strategy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if !is_retryable(&error) => return Err(RetryError::Aborted(error)),
            Err(error) if attempt >= max_attempts => {
                tracing::warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %error,
                    "retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }
            Err(error) => {
                let delay = strategy.delay_for(attempt);
                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
