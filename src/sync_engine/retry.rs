use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt; `max_retries + 1` attempts at most.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(2000),
            exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay between attempt `attempt` and `attempt + 1` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.exponential_backoff {
            let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
            self.retry_delay.saturating_mul(factor)
        } else {
            self.retry_delay
        }
    }
}

#[derive(Debug, Clone)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Runs `operation` until it yields a value `is_retryable` rejects or the
/// policy runs out of retries. The operation receives the zero-based attempt
/// number.
pub async fn with_retry<T, F, Fut, R>(policy: &RetryPolicy, mut operation: F, is_retryable: R) -> Retried<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = T>,
    R: Fn(&T) -> bool,
{
    let mut attempt = 0;
    loop {
        let value = operation(attempt).await;
        let attempts = attempt + 1;

        if attempt >= policy.max_retries || !is_retryable(&value) {
            return Retried { value, attempts };
        }

        let delay = policy.delay_for(attempt);
        log::debug!("Attempt {attempts} failed with a retryable error, retrying in {delay:?}");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(8000));
    }

    #[test]
    fn test_constant_delays() {
        let policy = RetryPolicy {
            exponential_backoff: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), policy.delay_for(5));
    }

    #[test]
    fn test_delay_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for(200) >= policy.delay_for(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::default();
        let started = Instant::now();

        let result = with_retry(
            &policy,
            move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), &str>("ETIMEDOUT")
            },
            |r: &Result<(), &str>| r.is_err(),
        )
        .await;

        assert_eq!(result.attempts, 4);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        // 2s + 4s + 8s of backoff
        assert!(started.elapsed() >= Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(
            &RetryPolicy::default(),
            move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                "permanent"
            },
            |_: &&str| false,
        )
        .await;

        assert_eq!(result.attempts, 1);
        assert_eq!(result.value, "permanent");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_later_attempt() {
        let result = with_retry(
            &RetryPolicy::default(),
            |attempt| async move { if attempt < 2 { Err("EAGAIN") } else { Ok(attempt) } },
            |r: &Result<u32, &str>| r.is_err(),
        )
        .await;

        assert_eq!(result.attempts, 3);
        assert_eq!(result.value, Ok(2));
    }
}
