use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to every delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(3000),
            max_delay: Duration::from_millis(30000),
            jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1) + jitter`, doubled when rate limited, capped at
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32, rate_limited: bool, jitter: Duration) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let mut delay = self.base_delay.saturating_mul(factor).saturating_add(jitter);
        if rate_limited {
            delay = delay.saturating_mul(2);
        }
        delay.min(self.max_delay)
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` is exhausted.
///
/// Non-retryable errors are returned immediately. The last error is always
/// handed back to the caller; fallback is the caller's business.
pub async fn run_with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        debug!(label, attempt, max_attempts, "attempting");
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt >= max_attempts => {
                warn!(label, attempt, error = %e, "giving up");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt, e.is_rate_limited(), policy.sample_jitter());
                warn!(
                    label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let p = policy();
        assert_eq!(p.delay_for(1, false, Duration::ZERO), Duration::from_millis(100));
        assert_eq!(p.delay_for(2, false, Duration::ZERO), Duration::from_millis(200));
        assert_eq!(p.delay_for(3, false, Duration::from_millis(50)), Duration::from_millis(450));
        assert_eq!(p.delay_for(10, false, Duration::ZERO), Duration::from_millis(1000));
    }

    #[test]
    fn rate_limit_widens_delay() {
        let p = policy();
        assert_eq!(p.delay_for(2, true, Duration::ZERO), Duration::from_millis(400));
        assert_eq!(p.delay_for(5, true, Duration::ZERO), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = Instant::now();
        let out = run_with_backoff(&policy(), "test", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(GenerationError::from_status("gemini", 500, "boom".into()))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 3);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(300) && waited < Duration::from_millis(310));
    }

    #[tokio::test(start_paused = true)]
    async fn reraises_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = run_with_backoff(&policy(), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(GenerationError::EmptyGeneration {
                provider: "gemini",
                reason: "no text".into(),
            })
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, GenerationError::EmptyGeneration { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = run_with_backoff(&policy(), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(GenerationError::MissingApiKey("Gemini"))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.is_request_error());
    }
}
