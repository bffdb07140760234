//! Token bucket gating eviction actions.
//!
//! Capacity is the configured burst, refilled continuously at the configured
//! rate. One bucket is shared by every workload and every cycle, so the rate
//! holds across cycle boundaries. Waiting for a token is bounded by the
//! caller's remaining cycle budget.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::config::LoopConfig;

/// Errors from the eviction rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// No token can be granted within the caller's budget.
    #[error("no eviction token within {budget:?} (next token in {wait:?})")]
    Exhausted {
        /// Time until a token would be available.
        wait: Duration,
        /// Budget the caller offered.
        budget: Duration,
    },
}

#[derive(Debug)]
struct Bucket {
    /// Available tokens; negative while a granted token is still being waited for.
    tokens: f64,
    last_refill_at: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, rate: f64, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill_at).as_secs_f64();
        self.tokens = elapsed.mul_add(rate, self.tokens).min(capacity);
        self.last_refill_at = now;
    }
}

/// Shared eviction rate limiter.
#[derive(Debug)]
pub struct EvictionRateLimiter {
    /// Tokens per second; `None` means limiting is disabled.
    rate: Option<f64>,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl EvictionRateLimiter {
    /// Create a limiter with `rate` tokens per second and `burst` capacity.
    ///
    /// A negative or infinite rate disables limiting. The bucket starts full.
    #[must_use]
    pub fn new(rate: f64, burst: u32) -> Self {
        let rate = (rate >= 0.0 && rate.is_finite()).then_some(rate);
        let capacity = f64::from(burst.max(1));
        Self {
            rate,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill_at: Instant::now(),
            }),
        }
    }

    /// Create a limiter that always grants.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(-1.0, 1)
    }

    /// Create a limiter from the loop configuration.
    #[must_use]
    pub fn from_config(config: &LoopConfig) -> Self {
        Self::new(config.eviction_rate_limit, config.eviction_rate_limit_burst)
    }

    /// Whether limiting is disabled.
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.rate.is_none()
    }

    /// Take one token, waiting at most `budget` for it.
    ///
    /// When a token is available now it is granted immediately. Otherwise the
    /// token is reserved and the call sleeps until it refills, but only if
    /// that happens within `budget`.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Exhausted`] when no token can be granted
    /// within `budget`. Nothing is consumed in that case.
    pub async fn try_acquire(&self, budget: Duration) -> Result<(), RateLimitError> {
        let Some(rate) = self.rate else {
            return Ok(());
        };

        let wait = {
            let mut bucket = self.bucket.lock().await;
            bucket.refill(Instant::now(), rate, self.capacity);

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                return Ok(());
            }

            let deficit = 1.0 - bucket.tokens;
            let wait = Duration::try_from_secs_f64(deficit / rate).unwrap_or(Duration::MAX);
            if wait > budget {
                return Err(RateLimitError::Exhausted { wait, budget });
            }
            bucket.tokens -= 1.0;
            wait
        };

        trace!(wait_ms = wait.as_millis(), "Waiting for eviction token");
        tokio::time::sleep(wait).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_negative_rate_always_grants() {
        let limiter = EvictionRateLimiter::new(-1.0, 1);
        assert!(limiter.is_unlimited());
        for _ in 0..100 {
            assert!(limiter.try_acquire(Duration::ZERO).await.is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_denied() {
        let limiter = EvictionRateLimiter::new(1.0, 3);
        for _ in 0..3 {
            assert!(limiter.try_acquire(Duration::ZERO).await.is_ok());
        }
        assert!(matches!(
            limiter.try_acquire(Duration::ZERO).await,
            Err(RateLimitError::Exhausted { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_within_budget() {
        let limiter = EvictionRateLimiter::new(2.0, 1);
        assert!(limiter.try_acquire(Duration::ZERO).await.is_ok());

        let before = Instant::now();
        assert!(limiter.try_acquire(Duration::from_secs(1)).await.is_ok());
        assert_eq!(before.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_over_time() {
        let limiter = EvictionRateLimiter::new(0.5, 1);
        assert!(limiter.try_acquire(Duration::ZERO).await.is_ok());
        assert!(limiter.try_acquire(Duration::ZERO).await.is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(limiter.try_acquire(Duration::ZERO).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_never_exceeds_burst() {
        let limiter = EvictionRateLimiter::new(10.0, 2);
        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(limiter.try_acquire(Duration::ZERO).await.is_ok());
        assert!(limiter.try_acquire(Duration::ZERO).await.is_ok());
        assert!(limiter.try_acquire(Duration::ZERO).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_denial_consumes_nothing() {
        let limiter = EvictionRateLimiter::new(1.0, 1);
        assert!(limiter.try_acquire(Duration::ZERO).await.is_ok());
        assert!(limiter.try_acquire(Duration::ZERO).await.is_err());
        assert!(limiter.try_acquire(Duration::ZERO).await.is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire(Duration::ZERO).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_grants_only_the_burst() {
        let limiter = EvictionRateLimiter::new(0.0, 1);
        assert!(!limiter.is_unlimited());
        assert!(limiter.try_acquire(Duration::ZERO).await.is_ok());
        assert!(limiter.try_acquire(Duration::from_secs(3600)).await.is_err());
    }
}
