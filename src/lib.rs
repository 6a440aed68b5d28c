#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Tollgate
//!
//! Per-client token-bucket admission control for Tower HTTP services.
//!
//! Every client key (by default the forwarded client address) gets its own lazily refilled
//! token bucket. Requests that find a token are forwarded; the rest are answered with
//! `429 Too Many Requests` before any application work happens.
//!
//! ## Features
//!
//! - **Token buckets** refilled from elapsed time, with no background task per client
//! - **Bucket registry** creating exactly one bucket per key under concurrent first access
//! - **Pluggable client identity** via [`KeyExtractor`]
//! - **Rate-limit headers** (`X-RateLimit-*`, `Retry-After`) on every response
//! - **Idle eviction** to bound memory under key churn
//! - **Telemetry sinks** built on `tower::Service`
//!
//! ## Quick Start
//!
//! ```rust
//! use std::convert::Infallible;
//! use http::{Request, Response};
//! use tollgate::{AdmissionConfig, AdmissionLayer};
//! use tower::{service_fn, ServiceBuilder, ServiceExt};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let layer = AdmissionLayer::from_config(&AdmissionConfig::default())?;
//!
//!     let svc = ServiceBuilder::new().layer(layer).service(service_fn(|_req: Request<()>| async {
//!         Ok::<_, Infallible>(Response::new(String::from("hello")))
//!     }));
//!
//!     let req = Request::builder().header("x-forwarded-for", "203.0.113.7").body(())?;
//!     let res = svc.oneshot(req).await?;
//!     assert_eq!(res.headers()["x-ratelimit-remaining"], "29.00");
//!     Ok(())
//! }
//! ```

pub mod adaptive;
pub mod clock;
pub mod config;
pub mod error;
pub mod prelude;
pub mod rate_limit;
pub mod telemetry;

// Re-exports
pub use adaptive::DynamicConfig;
pub use clock::{Clock, MonotonicClock};
pub use config::{AdmissionConfig, LimiterConfig};
pub use error::ConfigError;
pub use rate_limit::{
    AdmissionLayer, AdmissionService, BucketRegistry, Decision, ForwardedHeaders, KeyExtractor,
    RateLimitHeaders, TokenBucket,
};
