//! Startup configuration for the control loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Immutable configuration captured once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Time between cycle starts; also the budget of each cycle.
    pub interval: Duration,
    /// Workloads with fewer replicas are never evicted from.
    pub min_replicas: u32,
    /// Fraction of a workload's replicas evictable in one cycle.
    pub eviction_tolerance: f64,
    /// Evictions per second across all workloads; negative disables limiting.
    pub eviction_rate_limit: f64,
    /// Evictions allowed back to back before the rate applies.
    pub eviction_rate_limit_burst: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            min_replicas: 2,
            eviction_tolerance: 0.5,
            eviction_rate_limit: -1.0,
            eviction_rate_limit_burst: 1,
        }
    }
}

impl LoopConfig {
    /// Set the cycle interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the minimum replica count.
    #[must_use]
    pub const fn with_min_replicas(mut self, min_replicas: u32) -> Self {
        self.min_replicas = min_replicas;
        self
    }

    /// Set the eviction tolerance fraction.
    #[must_use]
    pub const fn with_eviction_tolerance(mut self, tolerance: f64) -> Self {
        self.eviction_tolerance = tolerance;
        self
    }

    /// Set the eviction rate limit and burst.
    #[must_use]
    pub const fn with_rate_limit(mut self, per_second: f64, burst: u32) -> Self {
        self.eviction_rate_limit = per_second;
        self.eviction_rate_limit_burst = burst;
        self
    }

    /// Check the configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when the interval is zero, the
    /// tolerance is outside `[0, 1]`, the rate is NaN, or the burst is zero.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::invalid_config("interval must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.eviction_tolerance) {
            return Err(Error::invalid_config(format!(
                "eviction tolerance must be within [0, 1], got {}",
                self.eviction_tolerance
            )));
        }
        if self.eviction_rate_limit.is_nan() {
            return Err(Error::invalid_config("eviction rate limit must be a number"));
        }
        if self.eviction_rate_limit_burst == 0 {
            return Err(Error::invalid_config(
                "eviction rate limit burst must be at least 1",
            ));
        }
        Ok(())
    }

    /// Whether eviction rate limiting is switched off.
    #[must_use]
    pub fn rate_limit_disabled(&self) -> bool {
        self.eviction_rate_limit < 0.0
    }
}
