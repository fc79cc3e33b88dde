//! Typed failure kinds for calls against external dependencies.
//!
//! Callers need to tell apart "the network flaked" from "this dependency is
//! not configured" from "the breaker refused to even try" — they are handled
//! differently (retry, fail fast, surface immediately).

use thiserror::Error;

/// Transient failures (timeouts, 5xx, resets) are retried inside the
/// resilience wrapper and only escape as `RetriesExhausted`.
#[derive(Debug, Error)]
pub enum CallError {
    /// Dependency not configured (missing credentials/endpoint). Never
    /// retried.
    #[error("{op} is not configured")]
    Disabled { op: &'static str },

    /// Malformed input (bad vector shape, empty vector). Rejected locally,
    /// never retried.
    #[error("invalid input for {op}: {reason}")]
    InvalidInput { op: &'static str, reason: String },

    /// The circuit breaker is open; no call was attempted. Terminal for the
    /// caller, counted separately from retry exhaustion.
    #[error("circuit open for {op}")]
    CircuitOpen { op: &'static str },

    /// All retry attempts failed.
    #[error("{op} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        op: &'static str,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

impl CallError {
    /// True when the failure is terminal without a successful side effect
    /// (the wrapper has already dead-lettered the payload).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallError::CircuitOpen { .. } | CallError::RetriesExhausted { .. }
        )
    }
}

pub type CallResult<T> = std::result::Result<T, CallError>;
