//! One orchestration pass over the managed workloads.

use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::LoopConfig;
use crate::error::{Error, Result};
use crate::rate_limit::EvictionRateLimiter;
use crate::target::{CompositeTargetSelectorFetcher, Resolution};
use crate::types::{
    CycleOutcome, CycleReport, EvictionRecord, LabelSelector, ManagedWorkload, Pod, PodRef,
};

/// Source of the managed workloads and their pods.
#[async_trait]
pub trait WorkloadInventory: Send + Sync {
    /// Snapshot of every workload under management.
    async fn list_managed_workloads(&self) -> Result<Vec<ManagedWorkload>>;

    /// Pods in `namespace` matching `selector`.
    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>>;
}

/// Decides which pods of a workload should be evicted.
#[async_trait]
pub trait EvictionDecider: Send + Sync {
    /// Pods to evict, most urgent first.
    async fn decide_evictions(
        &self,
        workload: &ManagedWorkload,
        pods: &[Pod],
    ) -> Result<Vec<PodRef>>;
}

/// Issues evictions.
#[async_trait]
pub trait EvictionSink: Send + Sync {
    /// Evict one pod.
    async fn evict(&self, pod: &PodRef) -> Result<()>;
}

/// Most pods that may be evicted from a workload in one cycle.
///
/// `ceil(tolerance * replicas)`, at least one, never more than `replicas`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn eviction_cap(replicas: u32, tolerance: f64) -> usize {
    // Absorbs float error such as 0.7 * 10 = 7.000000000000001.
    const EPSILON: f64 = 1e-9;

    let replicas_usize = usize::try_from(replicas).unwrap_or(usize::MAX);
    let scaled = tolerance.clamp(0.0, 1.0) * f64::from(replicas) - EPSILON;
    let cap = scaled.ceil().max(0.0) as usize;
    cap.max(1).min(replicas_usize)
}

/// Mutable state threaded through one cycle.
struct CycleState {
    report: CycleReport,
    /// Set once the rate limiter runs dry; no further evictions this cycle.
    rate_limited: bool,
}

fn deadline_passed(deadline: Instant) -> bool {
    Instant::now() >= deadline
}

/// Executes a single cycle against the external collaborators.
pub struct CycleExecutor {
    config: LoopConfig,
    inventory: Arc<dyn WorkloadInventory>,
    resolver: Arc<CompositeTargetSelectorFetcher>,
    decider: Arc<dyn EvictionDecider>,
    sink: Arc<dyn EvictionSink>,
    limiter: Arc<EvictionRateLimiter>,
}

impl CycleExecutor {
    /// Create a new cycle executor.
    pub fn new(
        config: LoopConfig,
        inventory: Arc<dyn WorkloadInventory>,
        resolver: Arc<CompositeTargetSelectorFetcher>,
        decider: Arc<dyn EvictionDecider>,
        sink: Arc<dyn EvictionSink>,
        limiter: Arc<EvictionRateLimiter>,
    ) -> Self {
        Self {
            config,
            inventory,
            resolver,
            decider,
            sink,
            limiter,
        }
    }

    /// Get the configuration.
    pub const fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run one cycle that must not start new work after `deadline`.
    ///
    /// Failures of single workloads are recorded in the report and never stop
    /// the cycle. Only an unreadable workload snapshot yields
    /// [`CycleOutcome::Failed`].
    pub async fn run_once(&self, deadline: Instant) -> CycleOutcome {
        let workloads = match self.inventory.list_managed_workloads().await {
            Ok(workloads) => workloads,
            Err(e) => {
                warn!(error = %e, "Failed to read managed workloads");
                return CycleOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let mut state = CycleState {
            report: CycleReport::started_now(),
            rate_limited: false,
        };
        state.report.workloads_total = workloads.len();
        debug!(workloads = workloads.len(), "Starting cycle");

        for workload in &workloads {
            if deadline_passed(deadline) {
                warn!(
                    processed = state.report.workloads_processed,
                    remaining = workloads.len().saturating_sub(state.report.workloads_processed),
                    "Cycle deadline reached, leaving remaining workloads for next cycle"
                );
                return CycleOutcome::TimedOut(state.report);
            }

            state.report.workloads_processed += 1;
            if self
                .process_workload(workload, deadline, &mut state)
                .await
                .is_break()
            {
                warn!(workload = %workload.reference, "Cycle deadline reached mid-workload");
                return CycleOutcome::TimedOut(state.report);
            }
        }

        if state.report.failures.is_empty() {
            CycleOutcome::Success(state.report)
        } else {
            CycleOutcome::PartialFailure(state.report)
        }
    }

    /// Process one workload. `Break` means the deadline passed mid-way.
    async fn process_workload(
        &self,
        workload: &ManagedWorkload,
        deadline: Instant,
        state: &mut CycleState,
    ) -> ControlFlow<()> {
        let reference = &workload.reference;

        if workload.replicas < self.config.min_replicas {
            debug!(
                workload = %reference,
                replicas = workload.replicas,
                min_replicas = self.config.min_replicas,
                "Too few replicas to evict from"
            );
            state.report.skipped_below_min_replicas += 1;
            return ControlFlow::Continue(());
        }

        let selector = match self.resolver.resolve(reference).await {
            Ok(Resolution::Found {
                selector,
                fetcher,
                recovered,
            }) => {
                if !recovered.is_empty() {
                    info!(
                        workload = %reference,
                        fetcher,
                        earlier_failures = recovered.len(),
                        "Resolved target selector after earlier fetcher failures"
                    );
                    state.report.recovered_resolutions += 1;
                }
                selector
            }
            Ok(Resolution::NotFound) => {
                debug!(workload = %reference, "No fetcher understands workload, skipping");
                state.report.unmanaged += 1;
                return ControlFlow::Continue(());
            }
            Err(e) => {
                warn!(workload = %reference, error = %e, "Target selector resolution failed");
                state.report.record_failure(reference, Error::from(e));
                return ControlFlow::Continue(());
            }
        };
        if deadline_passed(deadline) {
            return ControlFlow::Break(());
        }

        let pods = match self.inventory.list_pods(&reference.namespace, &selector).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(workload = %reference, error = %e, "Failed to list pods");
                state.report.record_failure(reference, e);
                return ControlFlow::Continue(());
            }
        };
        if deadline_passed(deadline) {
            return ControlFlow::Break(());
        }

        let decided = match self.decider.decide_evictions(workload, &pods).await {
            Ok(decided) => decided,
            Err(e) => {
                warn!(workload = %reference, error = %e, "Eviction decision failed");
                state.report.record_failure(reference, e);
                return ControlFlow::Continue(());
            }
        };

        let candidates = decided
            .into_iter()
            .unique()
            .filter(|p| pods.iter().any(|pod| &pod.reference == p))
            .collect_vec();
        if candidates.is_empty() {
            return ControlFlow::Continue(());
        }

        let cap = eviction_cap(workload.replicas, self.config.eviction_tolerance);
        if candidates.len() > cap {
            debug!(
                workload = %reference,
                candidates = candidates.len(),
                cap,
                "Capping evictions by tolerance"
            );
        }

        for pod in candidates.into_iter().take(cap) {
            if state.rate_limited {
                state.report.rate_limited += 1;
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return ControlFlow::Break(());
            }
            if let Err(e) = self.limiter.try_acquire(remaining).await {
                info!(
                    workload = %reference,
                    error = %e,
                    "Eviction rate limit reached, skipping remaining evictions this cycle"
                );
                state.rate_limited = true;
                state.report.rate_limited += 1;
                continue;
            }

            match self.sink.evict(&pod).await {
                Ok(()) => {
                    info!(workload = %reference, pod = %pod, "Evicted pod");
                    state.report.evicted.push(EvictionRecord {
                        workload: reference.to_string(),
                        pod,
                    });
                }
                Err(e) => {
                    warn!(workload = %reference, pod = %pod, error = %e, "Eviction failed");
                    state.report.record_failure(reference, e);
                }
            }
        }

        ControlFlow::Continue(())
    }
}

/// Builder for [`CycleExecutor`].
pub struct CycleExecutorBuilder {
    config: LoopConfig,
    inventory: Option<Arc<dyn WorkloadInventory>>,
    resolver: Option<Arc<CompositeTargetSelectorFetcher>>,
    decider: Option<Arc<dyn EvictionDecider>>,
    sink: Option<Arc<dyn EvictionSink>>,
    limiter: Option<Arc<EvictionRateLimiter>>,
}

impl CycleExecutorBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: LoopConfig::default(),
            inventory: None,
            resolver: None,
            decider: None,
            sink: None,
            limiter: None,
        }
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the workload inventory.
    #[must_use]
    pub fn with_inventory(mut self, inventory: Arc<dyn WorkloadInventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Set the target selector resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<CompositeTargetSelectorFetcher>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the eviction decider.
    #[must_use]
    pub fn with_decider(mut self, decider: Arc<dyn EvictionDecider>) -> Self {
        self.decider = Some(decider);
        self
    }

    /// Set the eviction sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EvictionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Share an existing rate limiter instead of building one from the config.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<EvictionRateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Build the executor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when the configuration is invalid or a
    /// collaborator is missing.
    pub fn build(self) -> Result<CycleExecutor> {
        self.config.validate()?;

        let inventory = self
            .inventory
            .ok_or_else(|| Error::invalid_config("workload inventory is required"))?;
        let resolver = self
            .resolver
            .ok_or_else(|| Error::invalid_config("target selector resolver is required"))?;
        let decider = self
            .decider
            .ok_or_else(|| Error::invalid_config("eviction decider is required"))?;
        let sink = self
            .sink
            .ok_or_else(|| Error::invalid_config("eviction sink is required"))?;
        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(EvictionRateLimiter::from_config(&self.config)));

        Ok(CycleExecutor::new(
            self.config,
            inventory,
            resolver,
            decider,
            sink,
            limiter,
        ))
    }
}

impl Default for CycleExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
