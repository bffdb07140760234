//! Liveness reporting for the control loop.
//!
//! The scheduler marks the state after every cycle attempt; the health
//! endpoint reads it. The timestamp is a single atomic, so reads never block
//! the loop and the loop never waits on a reader.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Timestamp of the last completed cycle.
///
/// Construction counts as the first sign of life, so a freshly started
/// process is not reported stale before its first tick.
#[derive(Debug)]
pub struct LivenessState {
    origin: Instant,
    /// Milliseconds from `origin` to the last mark.
    last_alive_ms: AtomicU64,
    marks: AtomicU64,
}

impl LivenessState {
    /// Create a state that is alive as of now.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Create a state that is alive as of `origin`.
    #[must_use]
    pub const fn starting_at(origin: Instant) -> Self {
        Self {
            origin,
            last_alive_ms: AtomicU64::new(0),
            marks: AtomicU64::new(0),
        }
    }

    /// Record that a cycle finished at `now`.
    ///
    /// Marks never move the timestamp backwards.
    pub fn mark_alive(&self, now: Instant) {
        let offset = millis(now.saturating_duration_since(self.origin));
        self.last_alive_ms.fetch_max(offset, Ordering::AcqRel);
        self.marks.fetch_add(1, Ordering::AcqRel);
    }

    /// Time of the last mark (or construction).
    #[must_use]
    pub fn last_alive(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_alive_ms.load(Ordering::Acquire))
    }

    /// Time since the last mark.
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_alive())
    }

    /// Whether the last mark is older than `max_age`.
    #[must_use]
    pub fn is_stale(&self, max_age: Duration, now: Instant) -> bool {
        self.age(now) > max_age
    }

    /// Number of marks since construction.
    #[must_use]
    pub fn marks(&self) -> u64 {
        self.marks.load(Ordering::Acquire)
    }
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthReport {
    Healthy,
    /// The loop has not completed a cycle for longer than the timeout.
    Stale { age: Duration, timeout: Duration },
}

impl HealthReport {
    /// Check if healthy.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Staleness check over a shared [`LivenessState`].
#[derive(Debug, Clone)]
pub struct HealthCheck {
    liveness: Arc<LivenessState>,
    activity_timeout: Duration,
    check_timeout: bool,
}

impl HealthCheck {
    /// Create a health check that fails once the last activity is older
    /// than `activity_timeout`. With `check_timeout` off it always passes.
    #[must_use]
    pub const fn new(
        liveness: Arc<LivenessState>,
        activity_timeout: Duration,
        check_timeout: bool,
    ) -> Self {
        Self {
            liveness,
            activity_timeout,
            check_timeout,
        }
    }

    /// Create a health check tolerating `multiplier` missed intervals.
    #[must_use]
    pub fn for_interval(liveness: Arc<LivenessState>, interval: Duration, multiplier: u32) -> Self {
        Self::new(liveness, interval.saturating_mul(multiplier), true)
    }

    /// The configured activity timeout.
    #[must_use]
    pub const fn activity_timeout(&self) -> Duration {
        self.activity_timeout
    }

    /// Evaluate liveness at `now`.
    #[must_use]
    pub fn check(&self, now: Instant) -> HealthReport {
        if !self.check_timeout || !self.liveness.is_stale(self.activity_timeout, now) {
            return HealthReport::Healthy;
        }
        HealthReport::Stale {
            age: self.liveness.age(now),
            timeout: self.activity_timeout,
        }
    }
}
