//! Convenient re-exports for common Tollgate types.
pub use crate::{
    adaptive::DynamicConfig,
    clock::{Clock, MonotonicClock},
    config::{AdmissionConfig, LimiterConfig},
    error::ConfigError,
    rate_limit::{
        AdmissionLayer, AdmissionService, BucketRegistry, Decision, ForwardedHeaders,
        KeyExtractor, RateLimitHeaders, TokenBucket,
    },
    telemetry::{AdmissionEvent, LogSink, MemorySink, NullSink, TelemetrySink},
};
