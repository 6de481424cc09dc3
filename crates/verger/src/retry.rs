//! Bounded retry around fallible async operations.

use crate::result::{VergerError, VergerResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay every time
    Fixed {
        /// Delay in milliseconds
        ms: u64,
    },
    /// `initial_ms + step_ms * (retry - 1)`
    Linear {
        /// First delay
        initial_ms: u64,
        /// Added per retry
        step_ms: u64,
    },
    /// `initial_ms * factor^(retry - 1)`, capped at `max_ms`
    Exponential {
        /// First delay
        initial_ms: u64,
        /// Growth factor
        factor: f64,
        /// Upper bound
        max_ms: u64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            initial_ms: 100,
            factor: 2.0,
            max_ms: 2_000,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (1-based)
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let n = retry.saturating_sub(1);
        let ms = match *self {
            Self::Fixed { ms } => ms,
            Self::Linear {
                initial_ms,
                step_ms,
            } => initial_ms.saturating_add(step_ms.saturating_mul(u64::from(n))),
            Self::Exponential {
                initial_ms,
                factor,
                max_ms,
            } => {
                let exp = n.min(30) as i32;
                let raw = initial_ms as f64 * factor.max(1.0).powi(exp);
                if raw >= max_ms as f64 {
                    max_ms
                } else {
                    raw as u64
                }
            }
        };
        Duration::from_millis(ms)
    }
}

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first; zero is treated as one
    pub max_attempts: u32,
    /// Delay schedule
    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` and the default backoff
    #[must_use]
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Replace the backoff
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// `op` receives the 1-based attempt number. Fatal and cancellation errors
/// are returned at once; otherwise the last error is returned after the final
/// attempt.
///
/// # Errors
///
/// Returns the error of the last attempt
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> VergerResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = VergerResult<T>>,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max || !is_retryable(&e) => return Err(e),
            Err(e) => {
                let delay = policy.backoff.delay(attempt);
                debug!(attempt, max, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn is_retryable(error: &VergerError) -> bool {
    !error.is_fatal() && !matches!(error, VergerError::Cancelled { .. })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    mod backoff_tests {
        use super::*;

        #[test]
        fn test_schedules() {
            let fixed = Backoff::Fixed { ms: 250 };
            assert_eq!(fixed.delay(1), Duration::from_millis(250));
            assert_eq!(fixed.delay(5), Duration::from_millis(250));

            let linear = Backoff::Linear {
                initial_ms: 100,
                step_ms: 50,
            };
            assert_eq!(linear.delay(1), Duration::from_millis(100));
            assert_eq!(linear.delay(3), Duration::from_millis(200));

            let exp = Backoff::default();
            assert_eq!(exp.delay(1), Duration::from_millis(100));
            assert_eq!(exp.delay(2), Duration::from_millis(200));
            assert_eq!(exp.delay(5), Duration::from_millis(1_600));
            assert_eq!(exp.delay(6), Duration::from_millis(2_000));
            assert_eq!(exp.delay(u32::MAX), Duration::from_millis(2_000));
        }

        #[test]
        fn test_yaml_shape() {
            let policy: RetryPolicy =
                crate::yaml::from_str("max_attempts: 4\nbackoff: { fixed: { ms: 10 } }").unwrap();
            assert_eq!(policy.max_attempts, 4);
            assert_eq!(policy.backoff, Backoff::Fixed { ms: 10 });
        }
    }

    mod retry_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_succeeds_after_failures() {
            let calls = AtomicU32::new(0);
            let value = retry(&RetryPolicy::attempts(3), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(VergerError::page("flaky"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();
            assert_eq!(value, 3);
            assert_eq!(calls.load(Ordering::SeqCst), 3);
        }

        #[tokio::test(start_paused = true)]
        async fn test_reraises_last_error() {
            let err = retry(&RetryPolicy::attempts(2), |attempt| async move {
                Err::<(), _>(VergerError::assertion(format!("attempt {attempt}")))
            })
            .await
            .unwrap_err();
            assert!(matches!(err, VergerError::AssertionFailed { ref message } if message == "attempt 2"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_fatal_is_not_retried() {
            let calls = AtomicU32::new(0);
            let err = retry(&RetryPolicy::attempts(5), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(VergerError::UnknownRole {
                        role: "x".into(),
                    })
                }
            })
            .await
            .unwrap_err();
            assert!(err.is_fatal());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_zero_attempts_runs_once() {
            let calls = AtomicU32::new(0);
            let _ = retry(&RetryPolicy::attempts(0), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(VergerError::page("x")) }
            })
            .await;
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }
}
