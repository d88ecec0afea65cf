//! Bounded retry for idempotent panel reads.
//!
//! Callers wrap `list` style calls in [`with_retry`]; writes are never
//! retried because a lost response does not mean the write was lost.

use std::future::Future;
use std::time::Duration;

use crate::error::PanelError;

/// Attempt budget and the pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget runs out. `what` names the call in log lines.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, PanelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PanelError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && e.is_retryable() => {
                tracing::warn!(
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "{what} failed, retrying",
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            backoff: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(fast(3), "list", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PanelError::RefreshInProgress)
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(fast(3), "list", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PanelError::Http {
                status: 503,
                body: String::new(),
            })
        })
        .await;
        assert_matches!(result, Err(PanelError::Http { status: 503, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(fast(5), "list", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PanelError::Unauthorized)
        })
        .await;
        assert_matches!(result, Err(PanelError::Unauthorized));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let _ = with_retry(fast(0), "list", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, PanelError>(())
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.backoff, Duration::from_secs(1));
        assert_eq!(RetryPolicy::none().attempts, 1);
    }
}
