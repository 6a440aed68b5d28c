//! Error types for limiter configuration.
//!
//! The request path has no error type of its own: a denial is an ordinary
//! [`Decision`](crate::Decision) and the middleware passes inner-service errors through.

use thiserror::Error;

/// Errors produced when validating or loading limiter configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Capacity must be finite and at least one token.
    #[error("capacity must be a finite number >= 1 (got {provided})")]
    InvalidCapacity {
        /// Value provided by caller.
        provided: f64,
    },
    /// Refill rate must be finite and non-negative.
    #[error("refill_rate must be a finite number >= 0 (got {provided})")]
    InvalidRefillRate {
        /// Value provided by caller.
        provided: f64,
    },
    /// Sweeping idle buckets needs a non-zero interval and idle age.
    #[error("sweep interval and ttl must be non-zero (interval {interval_secs}s, ttl {ttl_secs}s)")]
    InvalidSweep {
        /// Sweep interval in seconds.
        interval_secs: u64,
        /// Idle age in seconds.
        ttl_secs: u64,
    },
    /// An environment variable held a value that could not be parsed.
    #[error("environment variable {var} has invalid value '{value}'")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Raw value read from the environment.
        value: String,
    },
}
