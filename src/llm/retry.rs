//! Bounded retry with exponential backoff for completion calls

use super::LlmError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry policy for completion backend calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first call
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Policy with no backoff delay
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the attempt following `failed_attempt`.
    ///
    /// Exponential: base, 2*base, 4*base... capped at `max_delay`. A larger
    /// `retry_after` hint from the backend wins over the computed delay but
    /// is held to the same cap.
    pub fn backoff(&self, failed_attempt: u32, hint: Option<Duration>) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        let computed = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        match hint {
            Some(hint) if hint > computed => hint.min(self.max_delay),
            _ => computed,
        }
    }
}

/// Successful result plus the number of calls it took
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// The final error after the retry budget is spent (or a permanent failure)
#[derive(Debug, Error)]
#[error("failed after {attempts} attempt(s): {source}")]
pub struct RetryExhausted {
    pub attempts: u32,
    #[source]
    pub source: LlmError,
}

/// Wraps calls to the completion backend with bounded retry
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Backoff sleeps are async so
    /// other conversations keep running while this one waits.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<Attempted<T>, RetryExhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Completion succeeded after retry");
                    }
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = with_jitter(self.policy.backoff(attempt, error.retry_after));
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        kind = %error.kind,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "Completion failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(
                        attempt,
                        kind = %error.kind,
                        error = %error,
                        "Completion failed permanently"
                    );
                    return Err(RetryExhausted {
                        attempts: attempt,
                        source: error,
                    });
                }
            }
        }
    }
}

/// Add up to 25% random jitter so concurrent retries spread out
fn with_jitter(delay: Duration) -> Duration {
    let max_jitter_ms = u64::try_from(delay.as_millis() / 4).unwrap_or(u64::MAX);
    if max_jitter_ms == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..=max_jitter_ms);
    delay + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let controller = RetryController::new(RetryPolicy::immediate(3));
        let calls = AtomicU32::new(0);

        let result = controller
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(LlmError::network("connection reset"))
                    } else {
                        Ok("hello")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, "hello");
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_always_failing_stops_at_three() {
        let controller = RetryController::new(RetryPolicy::immediate(3));
        let calls = AtomicU32::new(0);

        let err = controller
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(LlmError::server_error("503")) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(err.source.kind, LlmErrorKind::ServerError);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let controller = RetryController::new(RetryPolicy::immediate(3));
        let calls = AtomicU32::new(0);

        let err = controller
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(LlmError::auth("invalid key")) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(policy.backoff(1, None), Duration::from_millis(500));
        assert_eq!(policy.backoff(2, None), Duration::from_secs(1));
        assert_eq!(policy.backoff(3, None), Duration::from_secs(2));
        assert_eq!(policy.backoff(4, None), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_honours_larger_hint() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff(1, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            policy.backoff(1, Some(Duration::from_millis(10))),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_backend_hint_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff(1, Some(Duration::from_secs(86_400))),
            policy.max_delay
        );
    }

    #[tokio::test]
    async fn test_huge_hint_does_not_stall_retry() {
        let controller = RetryController::new(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(20),
        });

        let started = std::time::Instant::now();
        let result = controller
            .execute(|attempt| async move {
                if attempt == 1 {
                    Err(LlmError::rate_limit("slow down").with_retry_after(Duration::from_secs(3600)))
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();

        assert_eq!(result.attempts, 2);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
