//! Per-client rate limiting.
//!
//! This module provides the building blocks for admission control:
//! - [`TokenBucket`]: lazily refilled quota for one client, with a single atomic decision.
//! - [`BucketRegistry`]: key to bucket map that creates exactly one bucket per key.
//! - [`KeyExtractor`]: how a request is mapped to a client key.
//! - [`AdmissionLayer`]: Tower middleware tying the above together for `http` services.
//!
//! # Architecture
//!
//! - **Middleware**: `AdmissionLayer` wraps your service. It resolves the client key, asks the
//!   registry for that client's bucket and either forwards the request or answers `429`.
//! - **Logic**: `TokenBucket` handles the math. Refill is computed on demand from elapsed
//!   time, so there is no timer task per bucket.
//! - **Storage**: `BucketRegistry` owns the buckets for the life of the process, with an
//!   optional idle sweep to bound memory under key churn.

use std::time::Duration;

pub mod bucket;
pub mod key;
pub mod middleware;
pub mod registry;

pub use bucket::TokenBucket;
pub use key::{ForwardedHeaders, KeyExtractor};
pub use middleware::{AdmissionLayer, AdmissionService, RateLimitHeaders};
pub use registry::BucketRegistry;

/// The outcome of a single [`TokenBucket::try_consume`] call.
///
/// Denial is an ordinary outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// A token was consumed and the request may proceed.
    Allowed {
        /// Tokens left after this acquisition.
        /// Useful for `X-RateLimit-Remaining` headers.
        remaining: f64,
    },
    /// Fewer than one token was available; nothing was consumed.
    Denied {
        /// Tokens currently available (always below one).
        remaining: f64,
        /// Time until one full token will have accrued at the bucket's refill rate.
        /// `Duration::MAX` when the bucket never refills.
        wait: Duration,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Tokens remaining after the decision, in both branches.
    pub fn remaining(&self) -> f64 {
        match self {
            Decision::Allowed { remaining } | Decision::Denied { remaining, .. } => *remaining,
        }
    }
}
