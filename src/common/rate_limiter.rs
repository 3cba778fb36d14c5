//! Dual-budget token bucket rate limiter.
//!
//! The exchange client must respect two independent rolling-window budgets
//! at once: a request-count budget and a "weight" budget (each call can cost
//! more than one unit of weight). Both buckets refill continuously over the
//! same window; a call blocks until both have capacity.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests allowed per rolling window.
    pub max_requests: usize,
    /// Maximum weight allowed per rolling window.
    pub max_weight: usize,
    /// Length of the rolling window.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 1200,
            max_weight: 6000,
            window: Duration::from_secs(60),
        }
    }
}

struct Bucket {
    available: usize,
    max: usize,
    last_refill: Instant,
}

impl Bucket {
    fn new(max: usize) -> Self {
        Self {
            available: max,
            max,
            last_refill: Instant::now(),
        }
    }

    /// Refill proportionally to elapsed time within the window (continuous
    /// refill, not a hard reset at the window boundary).
    fn refill(&mut self, window: Duration) {
        let elapsed = self.last_refill.elapsed();
        if elapsed >= window {
            self.available = self.max;
            self.last_refill = Instant::now();
            return;
        }
        let fraction = elapsed.as_secs_f64() / window.as_secs_f64();
        let restored = (fraction * self.max as f64) as usize;
        if restored > 0 {
            self.available = (self.available + restored).min(self.max);
            self.last_refill = Instant::now();
        }
    }
}

/// Token-bucket limiter enforcing a request-count budget and a weight
/// budget over the same rolling window. A call that cannot be satisfied
/// immediately waits for the oldest charge to age out rather than erroring.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
    window: Duration,
}

struct RateLimiterInner {
    requests: Bucket,
    weight: Bucket,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateLimiterInner {
                requests: Bucket::new(config.max_requests),
                weight: Bucket::new(config.max_weight),
            })),
            window: config.window,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RateLimiterConfig::default())
    }

    /// Blocks (with periodic retries as the window refills) until one
    /// request and `weight` units of weight are available, then charges
    /// both buckets.
    pub async fn acquire(&self, weight: usize) {
        loop {
            {
                let mut inner = self.inner.lock().await;
                inner.requests.refill(self.window);
                inner.weight.refill(self.window);

                if inner.requests.available >= 1 && inner.weight.available >= weight {
                    inner.requests.available -= 1;
                    inner.weight.available -= weight;
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    pub async fn available_requests(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.requests.refill(self.window);
        inner.requests.available
    }

    pub async fn available_weight(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.weight.refill(self.window);
        inner.weight.available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_with_full_budgets() {
        let limiter = RateLimiter::with_defaults();
        assert_eq!(limiter.available_requests().await, 1200);
        assert_eq!(limiter.available_weight().await, 6000);
    }

    #[tokio::test]
    async fn acquire_charges_both_buckets() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_requests: 10,
            max_weight: 50,
            window: Duration::from_secs(60),
        });
        limiter.acquire(5).await;
        assert_eq!(limiter.available_requests().await, 9);
        assert_eq!(limiter.available_weight().await, 45);
    }

    #[tokio::test]
    async fn acquire_waits_then_succeeds_after_refill() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_requests: 1,
            max_weight: 10,
            window: Duration::from_millis(100),
        });
        limiter.acquire(1).await;
        assert_eq!(limiter.available_requests().await, 0);

        let start = Instant::now();
        limiter.acquire(1).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
