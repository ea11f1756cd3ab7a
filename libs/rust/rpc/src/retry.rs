use crate::{
    config::RpcConfig,
    error::{ChainError, Result},
    rate_limiter::RateLimiter,
};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Bounded retry with exponential backoff; every attempt goes through the
/// shared [`RateLimiter`] first.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    limiter: Arc<RateLimiter>,
    max_retries: usize,
    retry_delay: Duration,
    backoff_multiplier: f64,
}

impl RetryExecutor {
    pub fn new(
        limiter: Arc<RateLimiter>,
        max_retries: usize,
        retry_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            limiter,
            max_retries: max_retries.max(1),
            retry_delay,
            backoff_multiplier,
        }
    }

    pub fn from_config(config: &RpcConfig, limiter: Arc<RateLimiter>) -> Self {
        Self::new(
            limiter,
            config.max_retries,
            config.retry_delay(),
            config.backoff_multiplier,
        )
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Delay after a failed attempt `attempt` (1-based) for ordinary errors.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        Duration::from_nanos((self.retry_delay.as_nanos() as f64 * factor).round() as u64)
    }

    /// Rate limits get a longer, linear backoff. Saturates at `Duration::MAX`.
    pub fn rate_limit_backoff(&self, attempt: usize) -> Duration {
        u32::try_from(attempt.saturating_mul(2))
            .ok()
            .and_then(|factor| self.retry_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    pub async fn call_with_retry<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            self.limiter.wait_for_rate_limit().await;

            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(label, attempt, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    debug!(label, attempt, error = %e, "Non-retryable error");
                    return Err(e);
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        let delay = if e.is_rate_limit() {
                            self.rate_limit_backoff(attempt)
                        } else {
                            self.backoff(attempt)
                        };
                        warn!(
                            label,
                            attempt,
                            max_retries = self.max_retries,
                            delay = ?delay,
                            error = %e,
                            "Request failed, retrying"
                        );
                        sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let source = last_error.unwrap_or_else(|| ChainError::Transport("no attempt made".into()));
        error!(label, attempts = self.max_retries, error = %source, "Max retries reached");
        Err(ChainError::RetryExhausted {
            label: label.to_string(),
            attempts: self.max_retries,
            source: Box::new(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn executor(max_retries: usize, retry_delay_ms: u64) -> RetryExecutor {
        RetryExecutor::new(
            Arc::new(RateLimiter::new(1_000, Duration::ZERO)),
            max_retries,
            Duration::from_millis(retry_delay_ms),
            2.0,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_retries_with_exponential_backoff() {
        let executor = executor(4, 100);
        let attempts = AtomicUsize::new(0);
        let start = Instant::now();

        let result: Result<()> = executor
            .call_with_retry("agenda count", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(ChainError::Transport("connection reset".into())) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        // 100 + 200 + 400, no sleep after the final attempt
        assert_eq!(start.elapsed(), Duration::from_millis(700));
        match result {
            Err(ChainError::RetryExhausted {
                label,
                attempts,
                source,
            }) => {
                assert_eq!(label, "agenda count");
                assert_eq!(attempts, 4);
                assert!(matches!(*source, ChainError::Transport(_)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_use_the_longer_backoff() {
        let executor = executor(3, 100);
        let attempts = AtomicUsize::new(0);
        let start = Instant::now();

        let result: Result<()> = executor
            .call_with_retry("members", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(ChainError::from_transport("HTTP 429 Too Many Requests")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 100*2*1 + 100*2*2
        assert_eq!(start.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_final_attempt_exhausts_without_extra_wait() {
        let executor = executor(2, 100);
        let attempts = AtomicUsize::new(0);
        let start = Instant::now();

        let result: Result<()> = executor
            .call_with_retry("members", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(ChainError::RateLimited("429".into())) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        // only the wait between the two attempts, none after the last
        assert_eq!(start.elapsed(), Duration::from_millis(200));
        match result {
            Err(ChainError::RetryExhausted { attempts, source, .. }) => {
                assert_eq!(attempts, 2);
                assert!(source.is_rate_limit());
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let executor = executor(5, 10);
        let attempts = AtomicUsize::new(0);

        let value = executor
            .call_with_retry("block", || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt < 3 {
                        Err(ChainError::Timeout(Duration::from_secs(1)))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reverts_fail_fast() {
        let executor = executor(5, 1_000);
        let attempts = AtomicUsize::new(0);
        let start = Instant::now();

        let result: Result<()> = executor
            .call_with_retry("agenda 99", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(ChainError::Reverted("invalid agenda".into())) }
            })
            .await;

        assert!(matches!(result, Err(ChainError::Reverted(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn backoff_formula() {
        let executor = executor(5, 250);
        assert_eq!(executor.backoff(1), Duration::from_millis(250));
        assert_eq!(executor.backoff(3), Duration::from_millis(1_000));
        assert_eq!(executor.rate_limit_backoff(2), Duration::from_millis(1_000));
    }

    #[test]
    fn rate_limit_backoff_saturates_instead_of_overflowing() {
        let executor = RetryExecutor::new(
            Arc::new(RateLimiter::new(1_000, Duration::ZERO)),
            3,
            Duration::MAX,
            2.0,
        );
        assert_eq!(executor.rate_limit_backoff(1), Duration::MAX);
        assert_eq!(executor.rate_limit_backoff(usize::MAX), Duration::MAX);
        assert_eq!(executor.backoff(3), Duration::from_nanos(u64::MAX));
    }
}
