//! Reusable retry policy: bounded attempts, exponential backoff, and a
//! retryable-error predicate, applied uniformly to every provider call.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{BuyerGroupError, Result};

const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Predicate deciding whether an error is worth another attempt.
pub type RetryPredicate = fn(&BuyerGroupError) -> bool;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub retryable: RetryPredicate,
}

/// Result of a retried operation plus how many retries it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    /// Attempts beyond the first.
    pub retries: u32,
}

impl<T> RetryOutcome<T> {
    /// Calls made, including the first. Every attempt is billed by the provider.
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }
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
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            retryable: BuyerGroupError::is_transient,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            retryable: BuyerGroupError::is_transient,
        }
    }

    /// Persistence failures get exactly one retry.
    pub fn persistence() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(100),
            multiplier: 1.0,
            retryable: |e| matches!(e, BuyerGroupError::Persistence(_)),
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is 1-based.
    /// A server-supplied `Retry-After` wins, capped at one minute.
    pub fn backoff(&self, attempt: u32, err: &BuyerGroupError) -> Duration {
        if let Some(hint) = err.retry_after() {
            return hint.min(MAX_RETRY_AFTER);
        }
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut retries = 0;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        retries,
                    };
                }
                Err(err) if attempt < attempts && (self.retryable)(&err) => {
                    let delay = self.backoff(attempt, &err);
                    tracing::warn!(
                        operation,
                        attempt,
                        attempts,
                        ?delay,
                        error = %err,
                        "retrying after transient error"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    retries += 1;
                    attempt += 1;
                }
                Err(err) => {
                    return RetryOutcome {
                        result: Err(err),
                        retries,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            multiplier: 2.0,
            retryable: BuyerGroupError::is_transient,
        };
        let err = BuyerGroupError::unavailable("people", "503");
        assert_eq!(policy.backoff(1, &err), Duration::from_millis(100));
        assert_eq!(policy.backoff(2, &err), Duration::from_millis(200));
        assert_eq!(policy.backoff(3, &err), Duration::from_millis(350));
    }

    #[test]
    fn backoff_honours_retry_after() {
        let policy = RetryPolicy::default();
        let err = BuyerGroupError::rate_limited("people", Some(Duration::from_secs(2)));
        assert_eq!(policy.backoff(1, &err), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::immediate(5);
        let counter = calls.clone();
        let outcome = policy
            .execute("collect", || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 3 {
                        Err(BuyerGroupError::rate_limited("people", None))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(outcome.result.expect("eventually ok"), 3);
        assert_eq!(outcome.retries, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome: RetryOutcome<()> = RetryPolicy::immediate(5)
            .execute("resolve", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BuyerGroupError::not_found("acme"))
                }
            })
            .await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let outcome: RetryOutcome<()> = RetryPolicy::immediate(3)
            .execute("search", || async {
                Err(BuyerGroupError::unavailable("people", "down"))
            })
            .await;
        let err = outcome.result.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(outcome.retries, 2);
    }

    #[tokio::test]
    async fn persistence_policy_retries_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut policy = RetryPolicy::persistence();
        policy.initial_backoff = Duration::ZERO;
        policy.max_backoff = Duration::ZERO;
        let outcome: RetryOutcome<()> = policy
            .execute("commit", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BuyerGroupError::Persistence("locked".into()))
                }
            })
            .await;
        assert!(outcome.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
