//! Periodic, deadline-bounded eviction loop for resource rightsizing.
//!
//! On a fixed cadence the loop reads the workloads under management, resolves
//! the pods each one controls, and evicts replicas whose resources drifted
//! from their recommendation, within a tolerance per workload and a global
//! eviction rate limit.
//!
//! # Key Concepts
//!
//! ## Cycles
//!
//! Every tick the [`ControlLoop`] runs one cycle:
//! 1. Read a snapshot of managed workloads
//! 2. Skip workloads with fewer replicas than `min_replicas`
//! 3. Resolve each workload's pod selector through the fetcher chain
//! 4. Ask the eviction decider which pods to evict, capped by tolerance
//! 5. Evict, one rate-limiter token per eviction
//!
//! A cycle never starts new work after its deadline (start + interval) and
//! the next cycle never starts before the previous one returned.
//!
//! ## Liveness
//!
//! After every cycle, whatever its outcome, the loop marks [`LivenessState`].
//! A [`HealthCheck`] reports the process unhealthy once no cycle completed
//! for several intervals, which is how a hung cycle becomes visible.
//!
//! # Example
//!
//! ```ignore
//! use rightsizer_updater::{
//!     CompositeTargetSelectorFetcher, ControlLoop, CycleExecutorBuilder,
//!     DriftEvictionDecider, InMemoryCluster, LivenessState, LoopConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoopConfig::default();
//!     let cluster = Arc::new(InMemoryCluster::load("snapshot.json".as_ref())?);
//!
//!     let executor = CycleExecutorBuilder::new()
//!         .with_config(config.clone())
//!         .with_inventory(cluster.clone())
//!         .with_resolver(Arc::new(CompositeTargetSelectorFetcher::native_then_legacy(
//!             cluster.clone(),
//!         )))
//!         .with_decider(Arc::new(DriftEvictionDecider::default()))
//!         .with_sink(cluster)
//!         .build()?;
//!
//!     let liveness = Arc::new(LivenessState::new());
//!     let mut control = ControlLoop::new(Arc::new(executor), liveness, config.interval)?;
//!     control.run().await;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod cycle;
pub mod error;
pub mod liveness;
pub mod r#loop;
pub mod memory;
pub mod rate_limit;
pub mod target;
pub mod types;

// Re-export main types
pub use config::LoopConfig;
pub use cycle::{
    CycleExecutor, CycleExecutorBuilder, EvictionDecider, EvictionSink, WorkloadInventory,
    eviction_cap,
};
pub use error::{Error, ResolutionError, Result};
pub use liveness::{HealthCheck, HealthReport, LivenessState};
pub use memory::{ClusterSnapshot, ControllerEntry, DriftEvictionDecider, InMemoryCluster};
pub use r#loop::{ControlLoop, CycleRunner, LoopStopper};
pub use rate_limit::{EvictionRateLimiter, RateLimitError};
pub use target::{
    CompositeTargetSelectorFetcher, FetchOutcome, LegacyFetcher, NativeFetcher, Resolution,
    ScaleTargetLookup, TargetSelectorFetcher,
};
pub use types::{
    CycleOutcome, CycleReport, EvictionRecord, LabelRequirement, LabelSelector, ManagedWorkload,
    Pod, PodRef, ResourceShape, SelectorOperator, TargetRef, WorkloadFailure, WorkloadRef,
};
