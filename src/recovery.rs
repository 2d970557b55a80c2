//! Error recovery strategies
//!
//! Call sites pick how a failure is handled: give up, skip the result, substitute a
//! default, or retry with backoff. Retries only happen for errors that report
//! themselves as recoverable, and a delay suggested by the error (such as an open
//! circuit's `retry_after`) is preferred over the computed backoff.

use crate::error::Recoverable;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { initial: Duration, multiplier: f64 },
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential { initial, multiplier } => {
                let factor = multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
                let secs = initial.as_secs_f64() * factor;
                if secs.is_finite() {
                    Duration::from_secs_f64(secs.min(u32::MAX as f64))
                } else {
                    Duration::from_secs(u32::MAX as u64)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(200),
                multiplier: 2.0,
            },
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
            max_delay: delay,
        }
    }

    fn delay_for<E: Recoverable>(&self, err: &E, attempt: u32) -> Duration {
        err.suggested_retry_delay()
            .unwrap_or_else(|| self.backoff.delay(attempt))
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryStrategy {
    /// Return the error
    Abort,
    /// Log the error and produce nothing
    SkipAndContinue,
    /// Log the error and produce `T::default()`
    FallbackToDefault,
    Retry(RetryPolicy),
}

/// Run `operation` under `strategy`
///
/// `Ok(None)` only comes out of [`RecoveryStrategy::SkipAndContinue`].
pub async fn execute_with_recovery<T, E, F, Fut>(
    name: &str,
    strategy: &RecoveryStrategy,
    mut operation: F,
) -> Result<Option<T>, E>
where
    T: Default,
    E: Recoverable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match strategy {
        RecoveryStrategy::Abort => operation().await.map(Some),
        RecoveryStrategy::SkipAndContinue => match operation().await {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(operation = name, error = %err, "Operation failed, skipping");
                Ok(None)
            }
        },
        RecoveryStrategy::FallbackToDefault => match operation().await {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(operation = name, error = %err, "Operation failed, using default");
                Ok(Some(T::default()))
            }
        },
        RecoveryStrategy::Retry(policy) => {
            let attempts = policy.max_attempts.max(1);
            let mut attempt = 0;
            loop {
                match operation().await {
                    Ok(value) => return Ok(Some(value)),
                    Err(err) => {
                        attempt += 1;
                        if attempt >= attempts || !err.is_recoverable() {
                            return Err(err);
                        }
                        let delay = policy.delay_for(&err, attempt - 1);
                        debug!(
                            operation = name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Retrying after failure"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CircuitOpenError, RepositoryError};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn batch_failure() -> RepositoryError {
        RepositoryError::BatchProcessingFailed { failed: 1, total: 1 }
    }

    #[test]
    fn test_exponential_delays() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(Backoff::Fixed(Duration::from_secs(1)).delay(9), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        let result: Result<Option<u32>, RepositoryError> =
            execute_with_recovery("flaky", &RecoveryStrategy::Retry(policy), || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(batch_failure())
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result, Ok(Some(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<Option<u32>, RepositoryError> = execute_with_recovery(
            "down",
            &RecoveryStrategy::Retry(RetryPolicy::fixed(2, Duration::from_millis(10))),
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(batch_failure())
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecoverable_error_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<Option<u32>, RepositoryError> =
            execute_with_recovery("bad-path", &RecoveryStrategy::Retry(RetryPolicy::default()), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RepositoryError::InvalidPath {
                    path: PathBuf::from("/nope"),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suggested_delay_is_capped() {
        let policy = RetryPolicy::default();
        let err = RepositoryError::CircuitOpen(CircuitOpenError {
            circuit: "fs".to_string(),
            retry_after: Duration::from_secs(60),
        });
        assert_eq!(policy.delay_for(&err, 0), Duration::from_secs(5));

        let err = RepositoryError::CircuitOpen(CircuitOpenError {
            circuit: "fs".to_string(),
            retry_after: Duration::from_millis(50),
        });
        assert_eq!(policy.delay_for(&err, 0), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_skip_and_fallback() {
        let skipped: Result<Option<Vec<u8>>, RepositoryError> =
            execute_with_recovery("skip", &RecoveryStrategy::SkipAndContinue, || async { Err(batch_failure()) }).await;
        assert_eq!(skipped, Ok(None));

        let fallback: Result<Option<Vec<u8>>, RepositoryError> =
            execute_with_recovery("fallback", &RecoveryStrategy::FallbackToDefault, || async { Err(batch_failure()) })
                .await;
        assert_eq!(fallback, Ok(Some(Vec::new())));

        let aborted: Result<Option<Vec<u8>>, RepositoryError> =
            execute_with_recovery("abort", &RecoveryStrategy::Abort, || async { Err(batch_failure()) }).await;
        assert!(aborted.is_err());
    }
}
