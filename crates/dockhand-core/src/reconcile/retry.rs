//! Retry of optimistic-concurrency failures with exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dockhand_state::{ClusterError, ClusterResult, ObjectRef};

use crate::obs::emit_conflict_retry;

/// How often a conflicting write is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = no retries, run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            backoff_base_ms: 10,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay after failed attempt number `attempt` (1-based). Saturates
    /// instead of overflowing for large attempt numbers.
    pub fn delay(&self, attempt: u32) -> Duration {
        let millis = 2u64
            .checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.backoff_base_ms.checked_mul(factor))
            .unwrap_or(u64::MAX);
        Duration::from_millis(millis)
    }
}

/// Whether a failed write may succeed after re-reading the object.
pub fn is_retryable(err: &ClusterError) -> bool {
    matches!(
        err,
        ClusterError::Conflict { .. } | ClusterError::AlreadyExists { .. }
    )
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. `op` must re-read whatever it writes.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    object: &ObjectRef,
    mut op: F,
) -> ClusterResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClusterResult<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if is_retryable(&err) && attempt < max_attempts => {
                let delay = policy.delay(attempt);
                emit_conflict_retry(object, attempt, delay.as_millis() as u64);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> ClusterError {
        ClusterError::Conflict {
            object: ObjectRef::new("Secret", "default", "a"),
            given: "1".into(),
            current: "2".into(),
        }
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay(1), Duration::from_millis(10));
        assert_eq!(policy.delay(3), Duration::from_millis(40));
    }

    #[test]
    fn test_delay_saturates_for_large_attempts() {
        let policy = RetryPolicy {
            max_retries: 100,
            backoff_base_ms: 10,
        };
        assert_eq!(policy.delay(70), Duration::from_millis(u64::MAX));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(u64::MAX));
        // 10 * 2^60 still fits
        assert_eq!(policy.delay(61), Duration::from_millis(10 << 60));
        assert_eq!(policy.delay(62), Duration::from_millis(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let calls = &AtomicU32::new(0);
        let object = ObjectRef::new("Secret", "default", "a");
        let result = retry_on_conflict(&RetryPolicy::default(), &object, || async move {
            if calls.fetch_add(1, Ordering::Relaxed) < 2 {
                Err(conflict())
            } else {
                Ok("done")
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let object = ObjectRef::new("Secret", "default", "a");
        let err = retry_on_conflict(&RetryPolicy::default(), &object, || async move {
            calls.fetch_add(1, Ordering::Relaxed);
            Err::<(), _>(conflict())
        })
        .await
        .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(calls.load(Ordering::Relaxed), 5);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let object = ObjectRef::new("Secret", "default", "a");
        let err = retry_on_conflict(&RetryPolicy::default(), &object, || async move {
            calls.fetch_add(1, Ordering::Relaxed);
            Err::<(), _>(ClusterError::Backend("down".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ClusterError::Backend(_)));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
