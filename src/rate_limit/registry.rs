//! Registry of per-client token buckets.
//!
//! One registry is created at startup and shared (via `Arc`) by every clone of the
//! admission service. It grows with the number of distinct client keys; see
//! [`BucketRegistry::sweep_idle`] for bounding it.

use crate::adaptive::DynamicConfig;
use crate::clock::{Clock, MonotonicClock};
use crate::error::ConfigError;
use crate::rate_limit::TokenBucket;
use crate::telemetry::{emit_best_effort, AdmissionEvent, NullSink};
use crate::LimiterConfig;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Maps client keys to their buckets, creating each bucket at most once.
///
/// Lookups of existing keys take only the read lock, so steady-state traffic never
/// serializes across clients. The write lock is held only to insert a first-seen key or to
/// sweep.
#[derive(Debug)]
pub struct BucketRegistry {
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
    config: DynamicConfig<LimiterConfig>,
    clock: Arc<dyn Clock>,
}

impl Default for BucketRegistry {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}

impl BucketRegistry {
    /// Empty registry whose buckets use `config`.
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            config: DynamicConfig::new(config),
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (useful for deterministic tests).
    ///
    /// # Example
    /// ```
    /// # use tollgate::{BucketRegistry, Clock, LimiterConfig};
    /// #[derive(Debug)]
    /// struct Frozen;
    /// impl Clock for Frozen { fn now_nanos(&self) -> u64 { 0 } }
    /// let registry = BucketRegistry::new(LimiterConfig::default()).with_clock(Frozen);
    /// assert!(registry.get_or_create("203.0.113.7").try_consume().is_allowed());
    /// ```
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Parameters applied to buckets created from now on.
    ///
    /// Updating this does not touch existing buckets; their capacity and rate are fixed.
    pub fn config(&self) -> &DynamicConfig<LimiterConfig> {
        &self.config
    }

    /// The clock shared by every bucket in this registry.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Shared handle to the bucket for `key`, creating a full bucket on first sight.
    pub fn get_or_create(&self, key: &str) -> Arc<TokenBucket> {
        self.get_or_insert(key).0
    }

    /// Like [`get_or_create`](Self::get_or_create), also reporting whether this call created
    /// the bucket.
    pub(crate) fn get_or_insert(&self, key: &str) -> (Arc<TokenBucket>, bool) {
        if let Some(bucket) = self.read().get(key) {
            return (bucket.clone(), false);
        }

        let mut map = self.write();
        // Another caller may have inserted between dropping the read lock and taking the
        // write lock.
        if let Some(bucket) = map.get(key) {
            return (bucket.clone(), false);
        }
        let bucket = Arc::new(TokenBucket::with_clock(*self.config.get(), self.clock.clone()));
        map.insert(key.to_string(), bucket.clone());
        debug!(target: "tollgate::registry", client = %key, buckets = map.len(), "bucket created");
        (bucket, true)
    }

    /// Existing bucket for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Arc<TokenBucket>> {
        self.read().get(key).cloned()
    }

    /// Forget the bucket for `key`. The next request from that client starts full.
    pub fn remove(&self, key: &str) -> Option<Arc<TokenBucket>> {
        self.write().remove(key)
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True when no client has been seen (or all were evicted).
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// `(key, tokens)` for every bucket, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, f64)> {
        let map = self.read();
        let mut entries: Vec<(String, f64)> =
            map.iter().map(|(k, b)| (k.clone(), b.tokens())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Evict buckets idle for at least `max_idle` that have fully refilled and are not held
    /// by an in-flight request. Returns how many were removed.
    ///
    /// Only full, unreferenced buckets are dropped, so eviction never grants or revokes
    /// quota: a recreated bucket starts exactly where the evicted one stood.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now_nanos();
        let mut map = self.write();
        let before = map.len();
        map.retain(|_, bucket| {
            Arc::strong_count(bucket) > 1 || !bucket.is_reclaimable(now, max_idle)
        });
        let evicted = before - map.len();
        if evicted > 0 {
            info!(
                target: "tollgate::registry",
                evicted,
                remaining = map.len(),
                "evicted idle buckets"
            );
        }
        evicted
    }

    /// Run [`sweep_idle`](Self::sweep_idle) every `interval` on the current tokio runtime.
    ///
    /// The task holds only a weak reference and exits once the registry is dropped. Abort
    /// the returned handle to stop it earlier.
    ///
    /// # Errors
    /// [`ConfigError::InvalidSweep`] if `interval` is zero.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
    ) -> Result<JoinHandle<()>, ConfigError> {
        self.spawn_sweeper_with_sink(interval, max_idle, NullSink)
    }

    /// Like [`spawn_sweeper`](Self::spawn_sweeper), reporting each non-empty sweep to `sink`
    /// as [`AdmissionEvent::BucketsEvicted`].
    pub fn spawn_sweeper_with_sink<T>(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
        sink: T,
    ) -> Result<JoinHandle<()>, ConfigError>
    where
        T: tower::Service<AdmissionEvent, Response = ()> + Clone + Send + 'static,
        T::Error: std::error::Error + Send + 'static,
        T::Future: Send + 'static,
    {
        if interval.is_zero() {
            return Err(ConfigError::InvalidSweep {
                interval_secs: 0,
                ttl_secs: max_idle.as_secs(),
            });
        }
        let registry: Weak<Self> = Arc::downgrade(self);
        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = match registry.upgrade() {
                    Some(registry) => registry.sweep_idle(max_idle),
                    None => break,
                };
                if evicted > 0 {
                    let event = AdmissionEvent::BucketsEvicted { count: evicted };
                    emit_best_effort(sink.clone(), event).await;
                }
            }
        }))
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<TokenBucket>>> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<TokenBucket>>> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }
}
