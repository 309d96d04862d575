//! Bounded retry with exponential backoff

use crate::config::RetryConfig;
use crate::fetch::error::{FetchError, OperationError};
use std::future::Future;
use std::time::Duration;

/// Retry and backoff parameters for one network operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay after the first failed attempt
    pub base_delay: Duration,

    /// Ceiling on any single delay
    pub max_delay: Duration,

    /// Limit on one attempt; an attempt that runs over counts as transient
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            attempt_timeout: match config.attempt_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    ///
    /// `min(base * 2^(attempt-1), max)`, saturating at the ceiling instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// One transient failure that was followed by a retry
///
/// Not persisted; scoped to a single operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub delay: Duration,
    pub last_error: String,
}

/// The result of a retried operation plus the retries it took
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T, FetchError>,
    pub attempts: Vec<RetryAttempt>,
}

/// Runs network operations under a [`RetryPolicy`]
///
/// Cheap to clone; processors keep one and share it across items.
#[derive(Debug, Clone, Default)]
pub struct RetryingFetcher {
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails permanently, or runs out of attempts
    ///
    /// Transient failures are retried with exponential backoff. Permanent and parse
    /// failures end the loop at once.
    ///
    /// # Arguments
    ///
    /// * `operation` - Builds a fresh future for each attempt
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - The first successful result
    /// * `Err(FetchError)` - Why the operation was given up on
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        self.execute_traced(operation).await.result
    }

    /// Like [`execute`](Self::execute), also returning every retried failure
    pub async fn execute_traced<T, F, Fut>(&self, mut operation: F) -> Retried<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let mut attempts = Vec::new();
        let mut attempt: u32 = 1;

        loop {
            let outcome = match self.policy.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(OperationError::transient(format!(
                        "attempt timed out after {}ms",
                        limit.as_millis()
                    ))),
                },
                None => operation().await,
            };

            let message = match outcome {
                Ok(value) => {
                    return Retried {
                        result: Ok(value),
                        attempts,
                    }
                }
                Err(OperationError::Permanent(message)) => {
                    return Retried {
                        result: Err(FetchError::Permanent(message)),
                        attempts,
                    }
                }
                Err(OperationError::Parse(message)) => {
                    return Retried {
                        result: Err(FetchError::Parse(message)),
                        attempts,
                    }
                }
                Err(OperationError::Transient(message)) => message,
            };

            if attempt >= self.policy.max_attempts {
                tracing::debug!(attempt, error = %message, "Retries exhausted");
                return Retried {
                    result: Err(FetchError::Exhausted {
                        attempts: attempt,
                        last_error: message,
                    }),
                    attempts,
                };
            }

            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Transient failure, retrying"
            );
            attempts.push(RetryAttempt {
                attempt_number: attempt,
                delay,
                last_error: message,
            });

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
