use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
}

/// Consecutive-failure circuit breaker for one external dependency.
///
/// `Closed -> Open` after `failure_threshold` consecutive failures; while
/// open, `allow` rejects without attempting the call. After `recovery_time`
/// one trial call passes in `HalfOpen`: success closes the circuit and
/// clears the count, failure reopens it and restarts the cooldown clock.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_time: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_time: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_time,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call may proceed right now. Transitions `Open -> HalfOpen`
    /// once the cooldown has elapsed.
    pub async fn allow(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state == CircuitState::Open {
            let cooled = inner
                .opened_at
                .map(|at| at.elapsed() >= self.recovery_time)
                .unwrap_or(true);
            if cooled {
                inner.state = CircuitState::HalfOpen;
            } else {
                return false;
            }
        }
        true
    }

    pub async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.failures = 0;
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
    }

    pub async fn on_failure(&self, op: &str) {
        let mut inner = self.inner.lock().await;
        inner.failures += 1;
        if inner.failures >= self.failure_threshold {
            if inner.state != CircuitState::Open {
                warn!(op, failures = inner.failures, "circuit opened");
            }
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(10));
        for _ in 0..2 {
            cb.on_failure("dep").await;
            assert!(cb.allow().await);
        }
        cb.on_failure("dep").await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allow().await);
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(10));
        cb.on_failure("dep").await;
        cb.on_failure("dep").await;
        cb.on_success().await;
        cb.on_failure("dep").await;
        cb.on_failure("dep").await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_trial_after_cooldown_then_close_on_success() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(20));
        cb.on_failure("dep").await;
        assert!(!cb.allow().await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cb.allow().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        cb.on_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_and_restarts_cooldown() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(30));
        cb.on_failure("dep").await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cb.allow().await);
        cb.on_failure("dep").await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allow().await);
    }
}
