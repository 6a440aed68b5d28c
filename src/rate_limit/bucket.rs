use crate::clock::{Clock, MonotonicClock};
use crate::rate_limit::Decision;
use crate::LimiterConfig;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill_nanos: u64,
}

/// A token bucket for a single client.
///
/// Replenishes tokens at `refill_rate` per second, up to `capacity`. Refill is virtual: it is
/// computed from elapsed clock time whenever the bucket is consulted. Capacity and rate are
/// fixed at creation. All mutation happens under a mutex scoped to this bucket only.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Create a full bucket on the process monotonic clock.
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::default()))
    }

    /// Create a full bucket reading time from `clock`.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_nanos();
        Self {
            state: Mutex::new(BucketState { tokens: config.capacity(), last_refill_nanos: now }),
            capacity: config.capacity(),
            refill_rate: config.refill_rate(),
            clock,
        }
    }

    /// Refill from elapsed time, then take one token if at least one is available.
    ///
    /// A clock reading earlier than the last refill counts as zero elapsed time and does not
    /// move the refill mark backwards.
    pub fn try_consume(&self) -> Decision {
        let mut state = self.lock();
        let now = self.clock.now_nanos();
        self.refill(&mut state, now);

        if state.tokens < 1.0 {
            let remaining = state.tokens;
            return Decision::Denied { remaining, wait: self.wait_for_one(remaining) };
        }

        state.tokens -= 1.0;
        Decision::Allowed { remaining: state.tokens }
    }

    /// Maximum tokens (burst size).
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens restored per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Tokens as of the last decision, without applying pending refill.
    pub fn tokens(&self) -> f64 {
        self.lock().tokens
    }

    /// Clock reading of the last refill.
    pub fn last_refill_nanos(&self) -> u64 {
        self.lock().last_refill_nanos
    }

    /// True if the bucket has been untouched for at least `max_idle` and has refilled to
    /// capacity in the meantime, so discarding it cannot change any client's quota.
    pub(crate) fn is_reclaimable(&self, now_nanos: u64, max_idle: Duration) -> bool {
        let state = self.lock();
        let idle_nanos = now_nanos.saturating_sub(state.last_refill_nanos);
        if u128::from(idle_nanos) < max_idle.as_nanos() {
            return false;
        }
        let refilled = state.tokens + (idle_nanos as f64 / NANOS_PER_SEC) * self.refill_rate;
        refilled >= self.capacity
    }

    fn refill(&self, state: &mut BucketState, now: u64) {
        if now <= state.last_refill_nanos {
            return;
        }
        let elapsed_secs = (now - state.last_refill_nanos) as f64 / NANOS_PER_SEC;
        state.tokens = (state.tokens + elapsed_secs * self.refill_rate).min(self.capacity);
        state.last_refill_nanos = now;
    }

    fn wait_for_one(&self, tokens: f64) -> Duration {
        let missing = 1.0 - tokens;
        Duration::try_from_secs_f64(missing / self.refill_rate).unwrap_or(Duration::MAX)
    }

    // The guarded state is two plain numbers that are always left consistent, so a panic
    // elsewhere while holding the lock cannot corrupt it.
    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    fn bucket(capacity: f64, rate: f64, clock: &ManualClock) -> TokenBucket {
        let config = LimiterConfig::new(capacity, rate).unwrap();
        TokenBucket::with_clock(config, Arc::new(clock.clone()))
    }

    #[test]
    fn burst_then_deny_then_refill() {
        let clock = ManualClock::new();
        let b = bucket(30.0, 0.5, &clock);

        for expected in (0..30).rev() {
            let d = b.try_consume();
            assert!(d.is_allowed());
            assert_eq!(d.remaining(), expected as f64);
        }

        let d = b.try_consume();
        assert!(!d.is_allowed());
        assert_eq!(d.remaining(), 0.0);

        clock.advance(Duration::from_secs(2));
        let d = b.try_consume();
        assert!(d.is_allowed(), "two seconds at 0.5/s accrues one token");
        assert_eq!(d.remaining(), 0.0);
    }

    #[test]
    fn fractional_capacity_admits_floor() {
        let clock = ManualClock::new();
        let b = bucket(3.7, 1.0, &clock);
        let admitted = (0..10).filter(|_| b.try_consume().is_allowed()).count();
        assert_eq!(admitted, 3);
        let d = b.try_consume();
        assert!((d.remaining() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn refill_succeeds_iff_a_whole_token_accrued() {
        for (millis, expect) in [(500, false), (1_900, false), (2_000, true), (3_000, true)] {
            let clock = ManualClock::new();
            let b = bucket(30.0, 0.5, &clock);
            while b.try_consume().is_allowed() {}
            clock.advance(Duration::from_millis(millis));
            assert_eq!(b.try_consume().is_allowed(), expect, "after {millis}ms");
        }
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        let clock = ManualClock::new();
        let b = bucket(5.0, 10.0, &clock);
        b.try_consume();
        clock.advance(Duration::from_secs(3600));
        let d = b.try_consume();
        assert_eq!(d.remaining(), 4.0);
        assert!(b.tokens() <= b.capacity());
    }

    #[test]
    fn clock_regression_is_clamped() {
        let clock = ManualClock::new();
        clock.set_nanos(10_000_000_000);
        let b = bucket(2.0, 0.5, &clock);
        assert!(b.try_consume().is_allowed());
        assert!(b.try_consume().is_allowed());

        clock.set_nanos(5_000_000_000);
        let d = b.try_consume();
        assert!(!d.is_allowed());
        assert_eq!(d.remaining(), 0.0);
        assert_eq!(b.last_refill_nanos(), 10_000_000_000);

        clock.set_nanos(12_000_000_000);
        assert!(b.try_consume().is_allowed(), "elapsed measured from the high-water mark");
    }

    #[test]
    fn denied_wait_reflects_missing_fraction() {
        let clock = ManualClock::new();
        let b = bucket(1.0, 0.5, &clock);
        b.try_consume();
        clock.advance(Duration::from_secs(1));
        match b.try_consume() {
            Decision::Denied { remaining, wait } => {
                assert_eq!(remaining, 0.5);
                assert_eq!(wait, Duration::from_secs(1));
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn zero_rate_never_refills() {
        let clock = ManualClock::new();
        let b = bucket(1.0, 0.0, &clock);
        assert!(b.try_consume().is_allowed());
        clock.advance(Duration::from_secs(1_000_000));
        match b.try_consume() {
            Decision::Denied { wait, .. } => assert_eq!(wait, Duration::MAX),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn concurrent_consumers_never_over_admit() {
        let clock = ManualClock::new();
        let b = Arc::new(bucket(40.0, 0.0, &clock));
        let admitted = Arc::new(AtomicUsize::new(0));
        let threads = 100;
        let barrier = Arc::new(Barrier::new(threads));

        std::thread::scope(|scope| {
            for _ in 0..threads {
                let b = b.clone();
                let admitted = admitted.clone();
                let barrier = barrier.clone();
                scope.spawn(move || {
                    barrier.wait();
                    if b.try_consume().is_allowed() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 40);
        assert_eq!(b.tokens(), 0.0);
    }

    #[test]
    fn reclaimable_only_when_idle_and_full() {
        let clock = ManualClock::new();
        let b = bucket(10.0, 1.0, &clock);
        for _ in 0..10 {
            b.try_consume();
        }
        clock.advance(Duration::from_secs(5));
        assert!(!b.is_reclaimable(clock.now_nanos(), Duration::from_secs(5)), "only half refilled");
        clock.advance(Duration::from_secs(5));
        assert!(b.is_reclaimable(clock.now_nanos(), Duration::from_secs(5)));
        assert!(
            !b.is_reclaimable(clock.now_nanos(), Duration::from_secs(60)),
            "not idle long enough"
        );
    }
}
