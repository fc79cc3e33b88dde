use std::time::Duration;

use rand::Rng;

/// Exponential backoff schedule with random jitter. Jitter decorrelates
/// retry storms across instances hitting the same dependency.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, where `attempt` is the 1-based number
    /// of the attempt that just failed.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.0..self.initial_delay.as_secs_f64().max(1e-6));
        Duration::from_secs_f64(capped + jitter)
    }
}
