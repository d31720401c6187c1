//! Retry with exponential backoff and full jitter.
//!
//! Idempotent reads and chunk PUTs/GETs retry on `transient` and
//! `rate_limited`. Non-idempotent writes retry only when no HTTP response
//! was received at all; a response, even a 5xx, may mean the write landed.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// First backoff ceiling.
    pub base: Duration,
    /// Maximum backoff ceiling.
    pub cap: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Full-jitter delay before attempt `attempt + 1` (zero-based count of
    /// failures so far): uniform in `[0, min(cap, base * 2^attempt)]`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.cap);
        rand::thread_rng().gen_range(Duration::ZERO..=ceiling)
    }

    /// Run `op` until it succeeds, runs out of attempts, or fails with
    /// an unretryable error. `idempotent` gates retries on received
    /// HTTP responses.
    pub async fn run<T, Fut, Op>(&self, idempotent: bool, mut op: Op) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
        Op: FnMut() -> Fut,
    {
        let mut failures = 0u32;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let retryable = match &err {
                Error::Transient { connection, .. } => idempotent || *connection,
                // 429 is a received response; only idempotent calls replay.
                Error::RateLimited { .. } => idempotent,
                _ => false,
            };

            failures += 1;
            if !retryable || failures >= self.max_attempts {
                return Err(err);
            }

            let delay = match &err {
                Error::RateLimited {
                    retry_after: Some(hint),
                } => (*hint).min(self.cap),
                _ => self.delay_for(failures - 1),
            };
            debug!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying backend call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient(connection: bool) -> Error {
        Error::Transient {
            message: "boom".into(),
            connection,
        }
    }

    #[test]
    fn delay_ceiling_doubles_and_caps() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            assert!(policy.delay_for(0) <= Duration::from_millis(500));
            assert!(policy.delay_for(1) <= Duration::from_millis(1000));
            assert!(policy.delay_for(10) <= Duration::from_secs(30));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_attempts_exhausted() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<()> = policy
            .run(true, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient(false)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn non_idempotent_does_not_retry_on_response() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<()> = policy
            .run(false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient(false)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_idempotent_retries_connection_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<u32> = policy
            .run(false, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transient(true))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_never_retry() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<()> = policy
            .run(true, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Fatal("no".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
