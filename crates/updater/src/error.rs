//! Error types for the updater crate.

use thiserror::Error;

/// Result type alias for updater operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Updater error types.
///
/// Everything except [`Error::InvalidConfig`] and [`Error::SnapshotFailed`] is
/// recoverable at the cycle boundary: the control loop logs it and carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The managed workload snapshot could not be read.
    #[error("failed to list managed workloads: {reason}")]
    InventoryFailed { reason: String },

    /// Pods matching a workload selector could not be listed.
    #[error("failed to list pods for workload '{workload}': {reason}")]
    PodListingFailed { workload: String, reason: String },

    /// The eviction-decision engine errored for a workload.
    #[error("eviction decision failed for workload '{workload}': {reason}")]
    DecisionFailed { workload: String, reason: String },

    /// A single eviction was rejected.
    #[error("eviction of pod '{pod}' failed: {reason}")]
    EvictionFailed { pod: String, reason: String },

    /// A controller or scale subresource lookup errored.
    #[error("lookup of {target} failed: {reason}")]
    LookupFailed { target: String, reason: String },

    /// Target selector resolution failed in every fetcher that understood it.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The cluster snapshot could not be loaded.
    #[error("failed to load cluster snapshot: {reason}")]
    SnapshotFailed { reason: String },
}

impl Error {
    /// Create an inventory failed error.
    pub fn inventory_failed(reason: impl Into<String>) -> Self {
        Self::InventoryFailed {
            reason: reason.into(),
        }
    }

    /// Create a pod listing failed error.
    pub fn pod_listing_failed(workload: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PodListingFailed {
            workload: workload.into(),
            reason: reason.into(),
        }
    }

    /// Create a decision failed error.
    pub fn decision_failed(workload: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DecisionFailed {
            workload: workload.into(),
            reason: reason.into(),
        }
    }

    /// Create an eviction failed error.
    pub fn eviction_failed(pod: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EvictionFailed {
            pod: pod.into(),
            reason: reason.into(),
        }
    }

    /// Create a lookup failed error.
    pub fn lookup_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LookupFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a snapshot failed error.
    pub fn snapshot_failed(reason: impl Into<String>) -> Self {
        Self::SnapshotFailed {
            reason: reason.into(),
        }
    }
}

/// A fetcher understood a workload reference but its lookup errored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{fetcher} fetcher could not resolve {target}: {reason}")]
pub struct ResolutionError {
    /// Name of the fetcher that failed.
    pub fetcher: &'static str,
    /// Display form of the workload reference.
    pub target: String,
    /// Underlying lookup failure.
    pub reason: String,
}

impl ResolutionError {
    /// Create a resolution error.
    pub fn new(fetcher: &'static str, target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            fetcher,
            target: target.into(),
            reason: reason.into(),
        }
    }
}
