//! Call-rate ceilings and retry for service calls that can throttle.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

use crate::error::Result;

/// Sliding-window limiter: at most `max_calls` acquisitions within any `period`.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, period: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            period,
            calls: Mutex::new(VecDeque::with_capacity(max_calls.max(1))),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    /// Wait until a call slot is free and claim it.
    pub async fn acquire(&self) {
        let mut calls = self.calls.lock().await;
        self.expire(&mut calls, Instant::now());

        if calls.len() >= self.max_calls {
            if let Some(&oldest) = calls.front() {
                let ready_at = oldest + self.period;
                debug!("Rate limit of {} calls reached, waiting", self.max_calls);
                sleep_until(ready_at).await;
                self.expire(&mut calls, Instant::now());
            }
        }

        calls.push_back(Instant::now());
    }

    fn expire(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = calls.front() {
            if now.duration_since(oldest) >= self.period {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Attempt budget and backoff curve for retryable failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::config::STANDARD_RETRY_MAX_ATTEMPT_COUNT,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff to sleep after the given (1-based) failed attempt
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Rate limiter and retry policy applied together around one kind of call
#[derive(Debug, Clone)]
pub struct Throttle {
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl Throttle {
    pub fn new(limiter: RateLimiter, retry: RetryPolicy) -> Self {
        Self {
            limiter: Arc::new(limiter),
            retry,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn max_calls(&self) -> usize {
        self.limiter.max_calls()
    }

    /// Run `op`, claiming a limiter slot before every attempt. Only retryable
    /// errors are retried; the last error is returned once attempts run out.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            self.limiter.acquire().await;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let backoff = self.retry.backoff_after(attempt);
                    warn!(
                        "Attempt {}/{} failed, retrying in {:?}: {}",
                        attempt, self.retry.max_attempts, backoff, err
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn throttling() -> PipelineError {
        PipelineError::Service {
            service: "iotsitewise",
            code: Some("ThrottlingException".to_string()),
            message: "Rate exceeded".to_string(),
        }
    }

    fn unlimited(max_attempts: u32) -> Throttle {
        Throttle::new(
            RateLimiter::new(1000, Duration::from_secs(1)),
            RetryPolicy {
                max_attempts,
                ..RetryPolicy::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_caps_calls_per_period() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(10));

        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_secs(2));

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_frees_slots_after_idle_period() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        limiter.acquire().await;
        limiter.acquire().await;

        sleep(Duration::from_secs(5)).await;
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn test_zero_ceiling_is_clamped() {
        assert_eq!(RateLimiter::new(0, Duration::from_secs(1)).max_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let throttle = unlimited(10);

        let result: Result<()> = throttle
            .call(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(throttling()) }
            })
            .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(attempts.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let throttle = unlimited(10);

        let result = throttle
            .call(|| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt < 3 {
                        Err(throttling())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_propagates_immediately() {
        let attempts = AtomicU32::new(0);
        let throttle = unlimited(10);

        let result: Result<()> = throttle
            .call(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(PipelineError::Missing("asset".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(PipelineError::Missing(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(4), Duration::from_millis(800));
        assert_eq!(policy.backoff_after(9), Duration::from_secs(5));
        assert_eq!(policy.backoff_after(40), Duration::from_secs(5));
    }
}
