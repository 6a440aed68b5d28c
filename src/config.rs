//! Limiter configuration.
//!
//! [`LimiterConfig`] holds the validated per-bucket parameters. [`AdmissionConfig`] is the
//! wider, serializable settings document for a gate, including optional idle eviction and
//! the rejection body. It can be overlaid from `TOLLGATE_*` environment variables.

use crate::error::ConfigError;
use std::time::Duration;

/// Default bucket capacity (maximum burst).
pub const DEFAULT_CAPACITY: f64 = 30.0;
/// Default refill rate in tokens per second.
pub const DEFAULT_REFILL_RATE: f64 = 0.5;
/// Default body for throttled responses.
pub const DEFAULT_REJECTION_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

const ENV_CAPACITY: &str = "TOLLGATE_CAPACITY";
const ENV_REFILL_RATE: &str = "TOLLGATE_REFILL_RATE";
const ENV_IDLE_TTL: &str = "TOLLGATE_IDLE_TTL_SECS";
const ENV_SWEEP_INTERVAL: &str = "TOLLGATE_SWEEP_INTERVAL_SECS";
const ENV_REJECTION_MESSAGE: &str = "TOLLGATE_REJECTION_MESSAGE";

/// Validated parameters every new bucket is created with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterConfig {
    capacity: f64,
    refill_rate: f64,
}

impl LimiterConfig {
    /// Create a config with validation.
    ///
    /// # Examples
    /// ```
    /// use tollgate::LimiterConfig;
    /// let cfg = LimiterConfig::new(30.0, 0.5).unwrap();
    /// assert_eq!(cfg.capacity(), 30.0);
    /// assert!(LimiterConfig::new(0.0, 0.5).is_err());
    /// ```
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self, ConfigError> {
        if !capacity.is_finite() || capacity < 1.0 {
            return Err(ConfigError::InvalidCapacity { provided: capacity });
        }
        if !refill_rate.is_finite() || refill_rate < 0.0 {
            return Err(ConfigError::InvalidRefillRate { provided: refill_rate });
        }
        Ok(Self { capacity, refill_rate })
    }

    /// Maximum tokens a bucket holds.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens restored per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_CAPACITY, refill_rate: DEFAULT_REFILL_RATE }
    }
}

/// Full settings for an admission gate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AdmissionConfig {
    /// Maximum tokens per client bucket.
    pub capacity: f64,
    /// Tokens restored per second.
    pub refill_rate: f64,
    /// Evict buckets idle for at least this many seconds. `None` keeps buckets forever.
    pub idle_ttl_secs: Option<u64>,
    /// How often the idle sweep runs when `idle_ttl_secs` is set.
    pub sweep_interval_secs: u64,
    /// Plain-text body of throttled responses.
    pub rejection_message: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            refill_rate: DEFAULT_REFILL_RATE,
            idle_ttl_secs: None,
            sweep_interval_secs: 60,
            rejection_message: DEFAULT_REJECTION_MESSAGE.to_string(),
        }
    }
}

impl AdmissionConfig {
    /// Defaults overlaid with any `TOLLGATE_*` variables present in the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    /// Overlay values from an arbitrary lookup (the environment in production, a map in tests).
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_CAPACITY) {
            self.capacity = parse_var(ENV_CAPACITY, raw)?;
        }
        if let Some(raw) = lookup(ENV_REFILL_RATE) {
            self.refill_rate = parse_var(ENV_REFILL_RATE, raw)?;
        }
        if let Some(raw) = lookup(ENV_IDLE_TTL) {
            self.idle_ttl_secs = Some(parse_var(ENV_IDLE_TTL, raw)?);
        }
        if let Some(raw) = lookup(ENV_SWEEP_INTERVAL) {
            self.sweep_interval_secs = parse_var(ENV_SWEEP_INTERVAL, raw)?;
        }
        if let Some(raw) = lookup(ENV_REJECTION_MESSAGE) {
            self.rejection_message = raw;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check all fields, returning the bucket parameters on success.
    pub fn validate(&self) -> Result<LimiterConfig, ConfigError> {
        let limiter = LimiterConfig::new(self.capacity, self.refill_rate)?;
        if let Some(ttl) = self.idle_ttl_secs {
            if ttl == 0 || self.sweep_interval_secs == 0 {
                return Err(ConfigError::InvalidSweep {
                    interval_secs: self.sweep_interval_secs,
                    ttl_secs: ttl,
                });
            }
        }
        Ok(limiter)
    }

    /// `(interval, max_idle)` for the sweeper, if eviction is enabled.
    pub fn sweep(&self) -> Option<(Duration, Duration)> {
        self.idle_ttl_secs.map(|ttl| {
            (Duration::from_secs(self.sweep_interval_secs), Duration::from_secs(ttl))
        })
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv { var, value: raw })
}
