//! Core types for the updater.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Reference to the controller a workload scales (`spec.targetRef`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    /// API group and version, e.g. `apps/v1`.
    pub api_version: String,
    /// Controller kind, e.g. `Deployment`.
    pub kind: String,
    /// Controller name.
    pub name: String,
}

impl TargetRef {
    /// Create a new target reference.
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// API group without the version (`""` for the core group).
    #[must_use]
    pub fn group(&self) -> &str {
        self.api_version
            .rsplit_once('/')
            .map_or("", |(group, _)| group)
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.kind, self.name, self.api_version)
    }
}

/// Reference to a workload under management.
///
/// A workload names its pods either through a controller reference (current
/// API) or through an inline label selector (legacy API). Which one is set
/// decides which fetcher is able to resolve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRef {
    /// Namespace of the workload object.
    pub namespace: String,
    /// Name of the workload object.
    pub name: String,
    /// Controller reference, understood by the native fetcher.
    #[serde(default)]
    pub target_ref: Option<TargetRef>,
    /// Inline selector, understood by the legacy fetcher.
    #[serde(default)]
    pub legacy_selector: Option<LabelSelector>,
}

impl WorkloadRef {
    /// Create a workload reference with neither a target nor a selector.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            target_ref: None,
            legacy_selector: None,
        }
    }

    /// Set the controller reference.
    #[must_use]
    pub fn with_target_ref(mut self, target_ref: TargetRef) -> Self {
        self.target_ref = Some(target_ref);
        self
    }

    /// Set the legacy inline selector.
    #[must_use]
    pub fn with_legacy_selector(mut self, selector: LabelSelector) -> Self {
        self.legacy_selector = Some(selector);
        self
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// CPU and memory requests of a container set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceShape {
    /// CPU in millicores.
    pub cpu_millis: u64,
    /// Memory in bytes.
    pub memory_bytes: u64,
}

impl ResourceShape {
    /// Create a new resource shape.
    #[must_use]
    pub const fn new(cpu_millis: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
        }
    }
}

/// A workload as seen in the per-cycle snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedWorkload {
    /// Workload reference.
    pub reference: WorkloadRef,
    /// Current replica count.
    pub replicas: u32,
    /// Recommended resource shape, if one has been computed.
    #[serde(default)]
    pub recommendation: Option<ResourceShape>,
}

impl ManagedWorkload {
    /// Create a managed workload.
    #[must_use]
    pub const fn new(reference: WorkloadRef, replicas: u32) -> Self {
        Self {
            reference,
            replicas,
            recommendation: None,
        }
    }

    /// Set the recommended shape.
    #[must_use]
    pub const fn with_recommendation(mut self, recommendation: ResourceShape) -> Self {
        self.recommendation = Some(recommendation);
        self
    }
}

/// Label selector operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// A single set-based selector requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

impl LabelRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            SelectorOperator::In => value.is_some_and(|v| self.values.contains(v)),
            SelectorOperator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
        }
    }
}

impl fmt::Display for LabelRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            SelectorOperator::In => write!(f, "{} in ({})", self.key, self.values.iter().join(",")),
            SelectorOperator::NotIn => {
                write!(f, "{} notin ({})", self.key, self.values.iter().join(","))
            }
            SelectorOperator::Exists => write!(f, "{}", self.key),
            SelectorOperator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// Label selector describing the pods of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<LabelRequirement>,
}

impl LabelSelector {
    /// Create an empty selector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality requirement.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    /// Add a set-based requirement.
    #[must_use]
    pub fn with_expression(mut self, requirement: LabelRequirement) -> Self {
        self.match_expressions.push(requirement);
        self
    }

    /// Whether the selector has no requirements.
    ///
    /// An empty selector would select every pod in the namespace, so
    /// fetchers never hand one out as a successful resolution.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Check a label set against every requirement.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.match_expressions.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels = self.match_labels.iter().map(|(k, v)| format!("{k}={v}"));
        let expressions = self.match_expressions.iter().map(ToString::to_string);
        write!(f, "{}", labels.chain(expressions).join(","))
    }
}

/// Reference to a single pod replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

impl PodRef {
    /// Create a pod reference.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A live pod replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub reference: PodRef,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub requests: ResourceShape,
}

impl Pod {
    /// Create a pod with no labels and zero requests.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            reference: PodRef::new(namespace, name),
            labels: BTreeMap::new(),
            requests: ResourceShape::default(),
        }
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set the resource requests.
    #[must_use]
    pub const fn with_requests(mut self, requests: ResourceShape) -> Self {
        self.requests = requests;
        self
    }
}

/// An eviction issued during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvictionRecord {
    pub workload: String,
    pub pod: PodRef,
}

/// A failure isolated to one workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadFailure {
    pub workload: String,
    pub reason: String,
}

/// Counters and records for a single cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Wall-clock start of the cycle.
    pub started_at: DateTime<Utc>,
    /// Workloads in the snapshot.
    pub workloads_total: usize,
    /// Workloads the cycle got to before finishing or timing out.
    pub workloads_processed: usize,
    /// Workloads skipped for having fewer replicas than required.
    pub skipped_below_min_replicas: usize,
    /// Workloads no fetcher understood.
    pub unmanaged: usize,
    /// Workloads resolved by a fallback fetcher after an earlier one failed.
    pub recovered_resolutions: usize,
    /// Evictions issued.
    pub evicted: Vec<EvictionRecord>,
    /// Evictions skipped because the rate limiter ran dry.
    pub rate_limited: usize,
    /// Per-workload failures.
    pub failures: Vec<WorkloadFailure>,
}

impl CycleReport {
    /// Create an empty report stamped with the current time.
    #[must_use]
    pub fn started_now() -> Self {
        Self {
            started_at: Utc::now(),
            ..Self::default()
        }
    }

    /// Evictions issued for one workload.
    #[must_use]
    pub fn evicted_from(&self, workload: &str) -> usize {
        self.evicted.iter().filter(|r| r.workload == workload).count()
    }

    pub(crate) fn record_failure(&mut self, workload: &WorkloadRef, reason: impl ToString) {
        self.failures.push(WorkloadFailure {
            workload: workload.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// How a cycle ended.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Every workload was processed without error.
    Success(CycleReport),
    /// Every workload was visited but some failed.
    PartialFailure(CycleReport),
    /// The deadline passed before every workload was visited.
    TimedOut(CycleReport),
    /// The workload snapshot could not be read; nothing was processed.
    Failed { reason: String },
}

impl CycleOutcome {
    /// Short label for logging.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::PartialFailure(_) => "partial_failure",
            Self::TimedOut(_) => "timed_out",
            Self::Failed { .. } => "failed",
        }
    }

    /// The cycle report, if the cycle got past the snapshot.
    #[must_use]
    pub const fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Success(r) | Self::PartialFailure(r) | Self::TimedOut(r) => Some(r),
            Self::Failed { .. } => None,
        }
    }

    /// Check if the cycle hit its deadline.
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}
