//! Prometheus metrics sink for `tollgate`.
//! Bring your own `prometheus::Registry`; counters are registered and incremented.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::Arc;
use std::task::{Context, Poll};
use tollgate::telemetry::{AdmissionEvent, TelemetrySink};

/// Counts admission events by kind.
///
/// Registers `tollgate_events_total{event}` and `tollgate_buckets_evicted_total`. Client
/// keys are never used as labels, so cardinality stays fixed.
#[derive(Clone, Debug)]
pub struct PrometheusSink {
    registry: Arc<Registry>,
    events: IntCounterVec,
    evicted: IntCounter,
}

impl PrometheusSink {
    /// Create a sink and register counters into the provided registry.
    ///
    /// # Errors
    /// Returns an error if a metric cannot be registered (e.g. name conflict).
    pub fn new<R: Into<Arc<Registry>>>(registry: R) -> Result<Self, prometheus::Error> {
        let registry = registry.into();
        let events = IntCounterVec::new(
            Opts::new("tollgate_events_total", "Admission events by kind"),
            &["event"],
        )?;
        let evicted = IntCounter::new(
            "tollgate_buckets_evicted_total",
            "Client buckets removed by idle sweeps",
        )?;
        registry.register(Box::new(events.clone()))?;
        registry.register(Box::new(evicted.clone()))?;
        tracing::debug!(target: "tollgate::prometheus", "registered admission counters");
        Ok(Self { registry, events, evicted })
    }

    /// Expose the registry for HTTP scraping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl tower_service::Service<AdmissionEvent> for PrometheusSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        self.events.with_label_values(&[event.kind()]).inc();
        if let AdmissionEvent::BucketsEvicted { count } = event {
            self.evicted.inc_by(count as u64);
        }
        ready(Ok(()))
    }
}

impl TelemetrySink for PrometheusSink {
    type SinkError = Infallible;
}
