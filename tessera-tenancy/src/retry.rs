//! Bounded retry with backoff for backend calls.

use crate::error::{BackendError, BackendResult};
use std::future::Future;
use std::time::Duration;
use tessera_config::RetrySettings;

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Retry immediately
    None,
    Constant(Duration),
    /// Delay grows by `multiplier` per attempt, capped at `max`
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => *d,
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let millis = initial.as_millis() as f64 * multiplier.powi(exponent);
                if !millis.is_finite() || millis >= max.as_millis() as f64 {
                    *max
                } else {
                    Duration::from_millis(millis as u64)
                }
            }
        }
    }
}

/// Retry policy applied to idempotent backend calls.
///
/// Every attempt runs under `operation_timeout`; expiry counts as a
/// retryable [`BackendError::Timeout`]. Only errors for which
/// [`BackendError::is_retryable`] holds are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub operation_timeout: Duration,
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn none(operation_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffStrategy::None,
            operation_timeout,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff: BackoffStrategy::Exponential {
                initial: settings.initial_backoff,
                max: settings.max_backoff,
                multiplier: settings.multiplier,
            },
            operation_timeout: settings.operation_timeout,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> BackendResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let mut attempt = 0;

        loop {
            let result = match tokio::time::timeout(self.operation_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(self.operation_timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying backend operation"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Run `op` once under the operation timeout. Used for writes, where a
    /// retry after an ambiguous failure could report a false conflict.
    pub async fn run_once<T, Fut>(&self, fut: Fut) -> BackendResult<T>
    where
        Fut: Future<Output = BackendResult<T>>,
    {
        tokio::time::timeout(self.operation_timeout, fut)
            .await
            .unwrap_or(Err(BackendError::Timeout(self.operation_timeout)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}
