//! Fixed-interval control loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{error, info, warn};

use crate::cycle::CycleExecutor;
use crate::error::{Error, Result};
use crate::liveness::LivenessState;
use crate::types::CycleOutcome;

/// Something the loop can run once per tick.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    /// Run one cycle that must not start new work after `deadline`.
    async fn run_once(&self, deadline: Instant) -> CycleOutcome;
}

#[async_trait]
impl CycleRunner for CycleExecutor {
    async fn run_once(&self, deadline: Instant) -> CycleOutcome {
        Self::run_once(self, deadline).await
    }
}

/// Periodic, non-overlapping cycle scheduler.
///
/// The first cycle starts one full interval after [`ControlLoop::run`] is
/// called. Each cycle gets a deadline of its start plus the interval. When a
/// cycle overruns, the next one starts as soon as it returns, so cycles never
/// overlap and consecutive starts are at least one interval apart. Liveness
/// is marked after every cycle, whatever its outcome.
pub struct ControlLoop {
    runner: Arc<dyn CycleRunner>,
    liveness: Arc<LivenessState>,
    interval: Duration,
    stop_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
}

impl ControlLoop {
    /// Create a new control loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `interval` is zero.
    pub fn new(
        runner: Arc<dyn CycleRunner>,
        liveness: Arc<LivenessState>,
        interval: Duration,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::invalid_config("interval must be greater than zero"));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(Self {
            runner,
            liveness,
            interval,
            stop_rx,
            stop_tx,
        })
    }

    /// Shared liveness state written by this loop.
    pub fn liveness(&self) -> Arc<LivenessState> {
        Arc::clone(&self.liveness)
    }

    /// Run cycles until stopped.
    ///
    /// Cycle errors never end the loop; it only returns once a stop is
    /// requested through [`ControlLoop::stop`] or a [`LoopStopper`].
    pub async fn run(&mut self) {
        info!(
            interval_ms = self.interval.as_millis(),
            "Starting control loop"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycle: u64 = 0;

        loop {
            tokio::select! {
                biased;

                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        info!(cycles = cycle, "Control loop stopped");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    cycle = cycle.wrapping_add(1);
                    self.run_cycle(cycle).await;
                }
            }
        }
    }

    async fn run_cycle(&self, cycle: u64) {
        let started = Instant::now();
        let deadline = started + self.interval;

        let outcome = self.runner.run_once(deadline).await;
        let elapsed_ms = started.elapsed().as_millis();

        match &outcome {
            CycleOutcome::Success(report) | CycleOutcome::PartialFailure(report) => info!(
                cycle,
                outcome = outcome.label(),
                elapsed_ms,
                workloads = report.workloads_total,
                evicted = report.evicted.len(),
                rate_limited = report.rate_limited,
                recovered = report.recovered_resolutions,
                failures = report.failures.len(),
                "Cycle complete"
            ),
            CycleOutcome::TimedOut(report) => warn!(
                cycle,
                elapsed_ms,
                processed = report.workloads_processed,
                workloads = report.workloads_total,
                evicted = report.evicted.len(),
                "Cycle timed out"
            ),
            CycleOutcome::Failed { reason } => error!(
                cycle,
                elapsed_ms,
                reason = %reason,
                "Cycle failed"
            ),
        }

        self.liveness.mark_alive(Instant::now());
    }

    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

/// Handle to stop a control loop.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}
