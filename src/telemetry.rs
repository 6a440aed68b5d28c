//! Telemetry for admission decisions.
//!
//! The admission layer emits an [`AdmissionEvent`] for every decision and for registry
//! lifecycle changes. Events flow through `TelemetrySink` implementations which can log,
//! aggregate, or forward them to external systems.
//!
//! # Event Types
//!
//! - **Decisions**: `Admitted`, `Throttled`
//! - **Registry**: `BucketCreated`, `BucketsEvicted`
//!
//! # Telemetry Sinks
//!
//! The `TelemetrySink` trait defines how events are consumed. It's implemented
//! as a `tower::Service<AdmissionEvent>` for composability. Emission is best-effort:
//! a failing or slow-to-ready sink never changes an admission outcome.
//!
//! ```rust
//! use tollgate::telemetry::{AdmissionEvent, MemorySink};
//! use tower::Service;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut sink = MemorySink::new();
//! sink.call(AdmissionEvent::Throttled { key: "203.0.113.7".into(), remaining: 0.0 })
//!     .await
//!     .unwrap();
//! assert_eq!(sink.len(), 1);
//! # });
//! ```

pub mod events;
pub mod sinks;

pub use events::AdmissionEvent;
#[cfg(feature = "telemetry-json")]
pub use events::event_to_json;
pub use sinks::{
    emit_best_effort, ComposedSinkError, LogSink, MemorySink, MulticastSink, NullSink,
    StreamingSink, TelemetrySink,
};
