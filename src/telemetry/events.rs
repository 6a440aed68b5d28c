use std::fmt;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// Events emitted by the admission layer and its registry.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionEvent {
    /// A request consumed a token and was forwarded.
    Admitted {
        /// Client key the request resolved to.
        key: String,
        /// Tokens left in the client's bucket.
        remaining: f64,
    },
    /// A request was answered with `429` without reaching the inner service.
    Throttled {
        /// Client key the request resolved to.
        key: String,
        /// Tokens available at the time (below one).
        remaining: f64,
    },
    /// First request from a previously unseen client.
    BucketCreated {
        /// Client key the bucket was created for.
        key: String,
    },
    /// An idle sweep removed buckets.
    BucketsEvicted {
        /// Number of buckets removed.
        count: usize,
    },
}

impl AdmissionEvent {
    /// Short, stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AdmissionEvent::Admitted { .. } => "admitted",
            AdmissionEvent::Throttled { .. } => "throttled",
            AdmissionEvent::BucketCreated { .. } => "bucket_created",
            AdmissionEvent::BucketsEvicted { .. } => "buckets_evicted",
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Admitted { key, remaining } => {
                write!(f, "Admitted({}, remaining={:.2})", key, remaining)
            }
            AdmissionEvent::Throttled { key, remaining } => {
                write!(f, "Throttled({}, remaining={:.2})", key, remaining)
            }
            AdmissionEvent::BucketCreated { key } => write!(f, "BucketCreated({})", key),
            AdmissionEvent::BucketsEvicted { count } => write!(f, "BucketsEvicted({})", count),
        }
    }
}

/// Convert an event into a JSON value for sinks.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &AdmissionEvent) -> serde_json::Value {
    match event {
        AdmissionEvent::Admitted { key, remaining } => {
            json!({ "kind": event.kind(), "key": key, "remaining": remaining })
        }
        AdmissionEvent::Throttled { key, remaining } => {
            json!({ "kind": event.kind(), "key": key, "remaining": remaining })
        }
        AdmissionEvent::BucketCreated { key } => json!({ "kind": event.kind(), "key": key }),
        AdmissionEvent::BucketsEvicted { count } => {
            json!({ "kind": event.kind(), "count": *count })
        }
    }
}
