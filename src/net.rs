//! Retry helpers for transient upstream failures.
//! Each attempt runs under its own timeout; only `FetchError::Network` is retried.

use crate::fetcher::{FetchError, PageFetcher};
use crate::query_key::PageKey;
use crate::types::Page;
use rand::{thread_rng, Rng};
use std::future::Future;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(300),
            max_jitter: Duration::from_millis(250),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No delay between attempts (tests, local replays)
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): 300, 600, 1200, ... capped at 32x base
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.clamp(1, 6) - 1;
        let base = self.base_delay.saturating_mul(1u32 << shift);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Run `op` until it succeeds, fails terminally, or attempts run out
pub async fn with_retry<R, F, Fut>(label: &str, policy: &RetryPolicy, mut op: F) -> Result<R, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, FetchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(r) => r,
            Err(_) => Err(FetchError::Network(format!(
                "timed out after {}ms",
                policy.attempt_timeout.as_millis()
            ))),
        };

        match result {
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff_delay(attempt);
                log::warn!(
                    "[net] err {label} retry={attempt} backoff={}ms : {e}",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

pub async fn fetch_page_with_retry<T: Send + 'static>(
    fetcher: &dyn PageFetcher<T>,
    key: &PageKey,
    policy: &RetryPolicy,
) -> Result<Page<T>, FetchError> {
    let label = format!("{} page {}", key.context, key.page_index);
    with_retry(&label, policy, || fetcher.fetch(key)).await
}
