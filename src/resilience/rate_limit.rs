use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Minimum-spacing rate limiter: successive `acquire` calls are spaced at
/// least `1/rps` apart. Callers block cooperatively until their turn; fair
/// FIFO ordering is not guaranteed, only the long-run rate bound.
pub struct RateLimiter {
    period: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(rps: f64) -> Self {
        Self {
            period: Duration::from_secs_f64(1.0 / rps.max(0.001)),
            last: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        // Hold the lock across the sleep so waiters are spaced out rather
        // than released in a burst.
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.period {
                tokio::time::sleep(self.period - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spaces_calls_by_at_least_the_period() {
        let limiter = RateLimiter::new(50.0); // 20ms period
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        // 3 gaps of >= 20ms after the first free call
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn first_call_is_not_delayed() {
        let limiter = RateLimiter::new(0.5);
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
