//! In-memory cluster and reference eviction decider.
//!
//! [`InMemoryCluster`] serves every cluster-facing trait from a snapshot, so
//! the loop can run end to end without an API server. Evicted pods are
//! removed from the snapshot; there is no controller to recreate them.

use std::path::Path;

use async_trait::async_trait;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::cycle::{EvictionDecider, EvictionSink, WorkloadInventory};
use crate::error::{Error, Result};
use crate::target::ScaleTargetLookup;
use crate::types::{LabelSelector, ManagedWorkload, Pod, PodRef, ResourceShape, TargetRef};

/// A controller and the selector it manages its pods with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerEntry {
    pub namespace: String,
    pub target: TargetRef,
    #[serde(default)]
    pub selector: Option<LabelSelector>,
}

/// Serialized cluster state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    #[serde(default)]
    pub controllers: Vec<ControllerEntry>,
    #[serde(default)]
    pub workloads: Vec<ManagedWorkload>,
    #[serde(default)]
    pub pods: Vec<Pod>,
}

/// Cluster backed by an in-memory snapshot.
pub struct InMemoryCluster {
    state: RwLock<ClusterSnapshot>,
    evicted: RwLock<Vec<PodRef>>,
}

impl InMemoryCluster {
    /// Create a cluster from a snapshot.
    pub fn new(snapshot: ClusterSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
            evicted: RwLock::new(Vec::new()),
        }
    }

    /// Parse a JSON snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SnapshotFailed`] if the JSON does not describe a snapshot.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map(Self::new)
            .map_err(|e| Error::snapshot_failed(e.to_string()))
    }

    /// Load a JSON snapshot from disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SnapshotFailed`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::snapshot_failed(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Modify the snapshot in place.
    pub async fn modify<F>(&self, f: F)
    where
        F: FnOnce(&mut ClusterSnapshot),
    {
        let mut state = self.state.write().await;
        f(&mut state);
    }

    /// Copy of the current snapshot.
    pub async fn snapshot(&self) -> ClusterSnapshot {
        self.state.read().await.clone()
    }

    /// Pods evicted so far, in order.
    pub async fn evicted(&self) -> Vec<PodRef> {
        self.evicted.read().await.clone()
    }

    async fn find_selector(&self, namespace: &str, target: &TargetRef) -> Result<Option<LabelSelector>> {
        self.state
            .read()
            .await
            .controllers
            .iter()
            .find(|c| c.namespace == namespace && &c.target == target)
            .map(|c| c.selector.clone())
            .ok_or_else(|| Error::lookup_failed(format!("{namespace}/{target}"), "not found"))
    }
}

#[async_trait]
impl WorkloadInventory for InMemoryCluster {
    async fn list_managed_workloads(&self) -> Result<Vec<ManagedWorkload>> {
        Ok(self.state.read().await.workloads.clone())
    }

    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>> {
        Ok(self
            .state
            .read()
            .await
            .pods
            .iter()
            .filter(|p| p.reference.namespace == namespace && selector.matches(&p.labels))
            .cloned()
            .collect_vec())
    }
}

#[async_trait]
impl ScaleTargetLookup for InMemoryCluster {
    async fn controller_selector(
        &self,
        namespace: &str,
        target: &TargetRef,
    ) -> Result<Option<LabelSelector>> {
        self.find_selector(namespace, target).await
    }

    async fn scale_selector(
        &self,
        namespace: &str,
        target: &TargetRef,
    ) -> Result<Option<LabelSelector>> {
        self.find_selector(namespace, target).await
    }
}

#[async_trait]
impl EvictionSink for InMemoryCluster {
    async fn evict(&self, pod: &PodRef) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let before = state.pods.len();
            state.pods.retain(|p| &p.reference != pod);
            if state.pods.len() == before {
                return Err(Error::eviction_failed(pod.to_string(), "pod not found"));
            }
        }
        self.evicted.write().await.push(pod.clone());
        Ok(())
    }
}

/// Evicts pods whose requests drifted from the workload's recommendation.
#[derive(Debug, Clone, Copy)]
pub struct DriftEvictionDecider {
    /// Relative drift above which a pod is evicted.
    threshold: f64,
}

impl Default for DriftEvictionDecider {
    fn default() -> Self {
        Self { threshold: 0.1 }
    }
}

impl DriftEvictionDecider {
    /// Create a decider with a relative drift threshold.
    #[must_use]
    pub const fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Largest relative difference between `requests` and `recommended`.
    #[must_use]
    pub fn drift(requests: ResourceShape, recommended: ResourceShape) -> f64 {
        fn relative(actual: u64, target: u64) -> f64 {
            if target == 0 {
                return if actual == 0 { 0.0 } else { f64::INFINITY };
            }
            actual.abs_diff(target) as f64 / target as f64
        }
        relative(requests.cpu_millis, recommended.cpu_millis)
            .max(relative(requests.memory_bytes, recommended.memory_bytes))
    }
}

#[async_trait]
impl EvictionDecider for DriftEvictionDecider {
    async fn decide_evictions(
        &self,
        workload: &ManagedWorkload,
        pods: &[Pod],
    ) -> Result<Vec<PodRef>> {
        let Some(recommended) = workload.recommendation else {
            return Ok(Vec::new());
        };

        Ok(pods
            .iter()
            .map(|p| (Self::drift(p.requests, recommended), p))
            .filter(|(drift, _)| *drift > self.threshold)
            .sorted_by(|(a, _), (b, _)| b.total_cmp(a))
            .map(|(_, p)| p.reference.clone())
            .collect_vec())
    }
}
