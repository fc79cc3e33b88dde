//! Resilient call wrapper for network-bound operations.
//!
//! Concern order, outer to inner: rate limit -> timeout -> retry ->
//! circuit-breaker gate -> dead-letter on terminal failure. One `Resilient`
//! instance per external dependency; the breaker and limiter state is owned
//! by that instance and never shared across dependencies.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::Settings;
use crate::dlq::DeadLetterQueue;
use crate::error::{CallError, CallResult};

mod breaker;
mod rate_limit;
mod retry;

pub use breaker::{CircuitBreaker, CircuitState};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub rps: f64,
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub failure_threshold: u32,
    pub recovery_time: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            rps: 10.0,
            call_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            failure_threshold: 5,
            recovery_time: Duration::from_secs(10),
        }
    }
}

impl ResilienceConfig {
    pub fn from_settings(settings: &Settings, rps: f64, call_timeout: Duration) -> Self {
        Self {
            rps,
            call_timeout,
            retry: RetryPolicy {
                max_attempts: settings.retry_max_attempts,
                initial_delay: settings.retry_initial_delay,
                max_delay: settings.retry_max_delay,
                multiplier: settings.retry_multiplier,
            },
            failure_threshold: settings.breaker_failure_threshold,
            recovery_time: settings.breaker_recovery_time,
        }
    }
}

pub struct Resilient {
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    call_timeout: Duration,
    dlq: DeadLetterQueue,
}

impl Resilient {
    pub fn new(config: ResilienceConfig, dlq: DeadLetterQueue) -> Self {
        Self {
            limiter: RateLimiter::new(config.rps),
            breaker: CircuitBreaker::new(config.failure_threshold, config.recovery_time),
            retry: config.retry,
            call_timeout: config.call_timeout,
            dlq,
        }
    }

    /// Runs `f` under the full resilience stack. `dlq_payload` must be a
    /// compact reconstruction payload for the side effect (never the full
    /// vector for large embeddings) — it is appended to the DLQ under `op`
    /// when the call fails terminally, before the error is returned.
    pub async fn call<T, F, Fut>(
        &self,
        op: &'static str,
        dlq_payload: serde_json::Value,
        f: F,
    ) -> CallResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.limiter.acquire().await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            if !self.breaker.allow().await {
                // No call attempted: terminal for the caller, and it must
                // not silently burn the retry budget.
                self.dlq.append_lossy(op, dlq_payload, "circuit_open");
                return Err(CallError::CircuitOpen { op });
            }

            let outcome = match tokio::time::timeout(self.call_timeout, f()).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(anyhow::anyhow!(
                    "timed out after {:?}",
                    self.call_timeout
                )),
            };

            match outcome {
                Ok(value) => {
                    self.breaker.on_success().await;
                    return Ok(value);
                }
                Err(e) => {
                    self.breaker.on_failure(op).await;
                    if attempt >= self.retry.max_attempts {
                        self.dlq.append_lossy(op, dlq_payload, &e.to_string());
                        return Err(CallError::RetriesExhausted {
                            op,
                            attempts: attempt,
                            source: e,
                        });
                    }
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(op, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Current breaker state, for observability and tests.
    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }
}
