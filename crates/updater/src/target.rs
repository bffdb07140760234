//! Target selector resolution.
//!
//! A workload names its pods in one of two ways, and each way has a fetcher:
//!
//! - **Native**: a `targetRef` pointing at a controller; the selector is read
//!   from the controller (well-known kinds) or its scale subresource.
//! - **Legacy**: an inline label selector from the older API.
//!
//! [`CompositeTargetSelectorFetcher`] tries the fetchers in priority order.
//! A fetcher that does not understand a reference *declines* and the next one
//! is asked. A fetcher that understands it but errors *fails*; the failure is
//! recorded and the next fetcher is still asked.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ResolutionError, Result};
use crate::types::{LabelSelector, SelectorOperator, TargetRef, WorkloadRef};

/// Controller kinds whose selector is read straight off the controller,
/// keyed by API group.
const WELL_KNOWN_CONTROLLERS: &[(&str, &str)] = &[
    ("apps", "Deployment"),
    ("apps", "ReplicaSet"),
    ("apps", "StatefulSet"),
    ("apps", "DaemonSet"),
    ("extensions", "Deployment"),
    ("extensions", "ReplicaSet"),
    ("extensions", "DaemonSet"),
    ("", "ReplicationController"),
    ("batch", "Job"),
    ("batch", "CronJob"),
];

/// Cluster lookups behind the native fetcher.
#[async_trait]
pub trait ScaleTargetLookup: Send + Sync {
    /// Read the pod selector of a well-known controller.
    ///
    /// `Ok(None)` means the controller exists but carries no selector.
    async fn controller_selector(
        &self,
        namespace: &str,
        target: &TargetRef,
    ) -> Result<Option<LabelSelector>>;

    /// Read the pod selector from a target's scale subresource.
    async fn scale_selector(
        &self,
        namespace: &str,
        target: &TargetRef,
    ) -> Result<Option<LabelSelector>>;
}

/// Result of asking one fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The fetcher does not understand this reference.
    Declined,
    /// The fetcher resolved a non-empty selector.
    Found(LabelSelector),
    /// The fetcher understood the reference but could not resolve it.
    Failed(ResolutionError),
}

/// Fetcher for workloads that reference their controller.
pub struct NativeFetcher {
    lookup: Arc<dyn ScaleTargetLookup>,
}

impl NativeFetcher {
    /// Create a native fetcher backed by a cluster lookup.
    pub fn new(lookup: Arc<dyn ScaleTargetLookup>) -> Self {
        Self { lookup }
    }

    fn target(workload: &WorkloadRef) -> Option<&TargetRef> {
        workload
            .target_ref
            .as_ref()
            .filter(|t| !t.kind.is_empty() && !t.name.is_empty())
    }

    fn is_well_known(target: &TargetRef) -> bool {
        WELL_KNOWN_CONTROLLERS
            .iter()
            .any(|(group, kind)| *group == target.group() && *kind == target.kind)
    }

    async fn fetch(&self, workload: &WorkloadRef, target: &TargetRef) -> FetchOutcome {
        let looked_up = if Self::is_well_known(target) {
            self.lookup
                .controller_selector(&workload.namespace, target)
                .await
        } else {
            self.lookup.scale_selector(&workload.namespace, target).await
        };

        match looked_up {
            Ok(Some(selector)) if !selector.is_empty() => FetchOutcome::Found(selector),
            Ok(_) => FetchOutcome::Failed(ResolutionError::new(
                "native",
                workload.to_string(),
                format!("{target} has an empty selector"),
            )),
            Err(e) => FetchOutcome::Failed(ResolutionError::new(
                "native",
                workload.to_string(),
                e.to_string(),
            )),
        }
    }
}

/// Fetcher for workloads that carry an inline selector.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyFetcher;

impl LegacyFetcher {
    /// Create a legacy fetcher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn fetch(workload: &WorkloadRef, selector: &LabelSelector) -> FetchOutcome {
        let fail = |reason: String| {
            FetchOutcome::Failed(ResolutionError::new("legacy", workload.to_string(), reason))
        };

        if selector.is_empty() {
            return fail("inline selector is empty".to_string());
        }
        let malformed = selector.match_expressions.iter().find(|r| {
            let needs_values = matches!(r.operator, SelectorOperator::In | SelectorOperator::NotIn);
            r.key.is_empty() || needs_values == r.values.is_empty()
        });
        match malformed {
            Some(r) => fail(format!("invalid requirement on key '{}'", r.key)),
            None => FetchOutcome::Found(selector.clone()),
        }
    }
}

/// A single strategy in the resolution chain.
pub enum TargetSelectorFetcher {
    Native(NativeFetcher),
    Legacy(LegacyFetcher),
}

impl TargetSelectorFetcher {
    /// Fetcher name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Native(_) => "native",
            Self::Legacy(_) => "legacy",
        }
    }

    /// The part of the reference this fetcher works from, if it has one.
    fn claim<'a>(&'a self, workload: &'a WorkloadRef) -> Option<Claim<'a>> {
        match self {
            Self::Native(native) => {
                NativeFetcher::target(workload).map(|target| Claim::Native(native, target))
            }
            Self::Legacy(_) => workload.legacy_selector.as_ref().map(Claim::Legacy),
        }
    }

    /// Whether this fetcher understands the reference.
    #[must_use]
    pub fn handles(&self, workload: &WorkloadRef) -> bool {
        self.claim(workload).is_some()
    }

    /// Ask this fetcher for the workload's selector.
    ///
    /// Declines without any lookup when [`Self::handles`] is false.
    pub async fn fetch(&self, workload: &WorkloadRef) -> FetchOutcome {
        match self.claim(workload) {
            None => FetchOutcome::Declined,
            Some(Claim::Native(native, target)) => native.fetch(workload, target).await,
            Some(Claim::Legacy(selector)) => LegacyFetcher::fetch(workload, selector),
        }
    }
}

/// What a fetcher resolves from once it has claimed a reference.
enum Claim<'a> {
    Native(&'a NativeFetcher, &'a TargetRef),
    Legacy(&'a LabelSelector),
}

/// Result of running the whole chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A fetcher produced a selector.
    Found {
        selector: LabelSelector,
        /// Fetcher that produced it.
        fetcher: &'static str,
        /// Failures of higher-priority fetchers that the fallback recovered from.
        recovered: Vec<ResolutionError>,
    },
    /// Every fetcher declined; the workload is not managed by any known API.
    NotFound,
}

impl Resolution {
    /// The resolved selector, if any.
    #[must_use]
    pub const fn selector(&self) -> Option<&LabelSelector> {
        match self {
            Self::Found { selector, .. } => Some(selector),
            Self::NotFound => None,
        }
    }
}

/// Ordered fallback chain of fetchers.
pub struct CompositeTargetSelectorFetcher {
    fetchers: Vec<TargetSelectorFetcher>,
}

impl CompositeTargetSelectorFetcher {
    /// Create a chain; fetchers are tried in the given order.
    #[must_use]
    pub const fn new(fetchers: Vec<TargetSelectorFetcher>) -> Self {
        Self { fetchers }
    }

    /// The standard chain: native first, legacy as fallback.
    pub fn native_then_legacy(lookup: Arc<dyn ScaleTargetLookup>) -> Self {
        Self::new(vec![
            TargetSelectorFetcher::Native(NativeFetcher::new(lookup)),
            TargetSelectorFetcher::Legacy(LegacyFetcher::new()),
        ])
    }

    /// Resolve a workload reference to its pod selector.
    ///
    /// # Errors
    ///
    /// Returns the last recorded [`ResolutionError`] when at least one fetcher
    /// understood the reference and none of them succeeded.
    pub async fn resolve(
        &self,
        workload: &WorkloadRef,
    ) -> std::result::Result<Resolution, ResolutionError> {
        let mut failures: Vec<ResolutionError> = Vec::new();

        for fetcher in &self.fetchers {
            match fetcher.fetch(workload).await {
                FetchOutcome::Declined => {
                    debug!(workload = %workload, fetcher = fetcher.name(), "Fetcher declined");
                }
                FetchOutcome::Failed(err) => {
                    warn!(
                        workload = %workload,
                        fetcher = fetcher.name(),
                        error = %err,
                        "Fetcher failed, trying next"
                    );
                    failures.push(err);
                }
                FetchOutcome::Found(selector) => {
                    debug!(
                        workload = %workload,
                        fetcher = fetcher.name(),
                        selector = %selector,
                        "Resolved target selector"
                    );
                    return Ok(Resolution::Found {
                        selector,
                        fetcher: fetcher.name(),
                        recovered: failures,
                    });
                }
            }
        }

        failures.pop().map_or(Ok(Resolution::NotFound), Err)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;
    use crate::error::Error;
    use crate::types::LabelRequirement;

    /// Lookup that answers every request the same way and records which
    /// path the native fetcher took.
    struct FixedLookup {
        answer: Result<Option<LabelSelector>>,
        scale_calls: std::sync::atomic::AtomicUsize,
    }

    impl FixedLookup {
        fn new(answer: Result<Option<LabelSelector>>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                scale_calls: std::sync::atomic::AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ScaleTargetLookup for FixedLookup {
        async fn controller_selector(
            &self,
            _namespace: &str,
            _target: &TargetRef,
        ) -> Result<Option<LabelSelector>> {
            self.answer.clone()
        }

        async fn scale_selector(
            &self,
            _namespace: &str,
            _target: &TargetRef,
        ) -> Result<Option<LabelSelector>> {
            self.scale_calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn native_selector() -> LabelSelector {
        LabelSelector::new().with_label("app", "native")
    }

    fn legacy_selector() -> LabelSelector {
        LabelSelector::new().with_label("app", "legacy")
    }

    fn deployment() -> TargetRef {
        TargetRef::new("apps/v1", "Deployment", "web")
    }

    #[tokio::test]
    async fn native_success_wins() {
        let chain = CompositeTargetSelectorFetcher::native_then_legacy(FixedLookup::new(Ok(
            Some(native_selector()),
        )));
        let workload = WorkloadRef::new("default", "web")
            .with_target_ref(deployment())
            .with_legacy_selector(legacy_selector());

        let resolved = chain.resolve(&workload).await;
        assert_eq!(
            resolved,
            Ok(Resolution::Found {
                selector: native_selector(),
                fetcher: "native",
                recovered: vec![],
            })
        );
    }

    #[tokio::test]
    async fn decline_does_not_shadow_fallback_success() {
        let chain = CompositeTargetSelectorFetcher::native_then_legacy(FixedLookup::new(Ok(
            Some(native_selector()),
        )));
        let workload = WorkloadRef::new("default", "old").with_legacy_selector(legacy_selector());

        let resolved = chain.resolve(&workload).await;
        assert_eq!(
            resolved.ok().and_then(|r| r.selector().cloned()),
            Some(legacy_selector())
        );
    }

    #[tokio::test]
    async fn primary_failure_falls_back_and_is_recorded() {
        let chain = CompositeTargetSelectorFetcher::native_then_legacy(FixedLookup::new(Err(
            Error::lookup_failed("Deployment/web", "connection reset"),
        )));
        let workload = WorkloadRef::new("default", "web")
            .with_target_ref(deployment())
            .with_legacy_selector(legacy_selector());

        let resolved = chain.resolve(&workload).await;
        match resolved {
            Ok(Resolution::Found {
                selector,
                fetcher,
                recovered,
            }) => {
                assert_eq!(selector, legacy_selector());
                assert_eq!(fetcher, "legacy");
                assert_eq!(recovered.len(), 1);
                assert!(recovered.iter().all(|e| e.fetcher == "native"));
            }
            other => panic!("expected legacy fallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_declined_is_not_found() {
        let chain = CompositeTargetSelectorFetcher::native_then_legacy(FixedLookup::new(Ok(
            Some(native_selector()),
        )));
        let workload = WorkloadRef::new("default", "orphan");

        assert_eq!(chain.resolve(&workload).await, Ok(Resolution::NotFound));
    }

    #[tokio::test]
    async fn all_failed_surfaces_last_failure() {
        let chain = CompositeTargetSelectorFetcher::native_then_legacy(FixedLookup::new(Err(
            Error::lookup_failed("Deployment/web", "forbidden"),
        )));
        let workload = WorkloadRef::new("default", "web")
            .with_target_ref(deployment())
            .with_legacy_selector(LabelSelector::new());

        let resolved = chain.resolve(&workload).await;
        assert!(matches!(resolved, Err(ResolutionError { fetcher: "legacy", .. })));
    }

    #[tokio::test]
    async fn single_failure_without_fallback_is_surfaced() {
        let chain = CompositeTargetSelectorFetcher::native_then_legacy(FixedLookup::new(Err(
            Error::lookup_failed("Deployment/web", "forbidden"),
        )));
        let workload = WorkloadRef::new("default", "web").with_target_ref(deployment());

        let resolved = chain.resolve(&workload).await;
        assert!(matches!(resolved, Err(ResolutionError { fetcher: "native", .. })));
    }

    #[tokio::test]
    async fn empty_controller_selector_is_a_failure() {
        let fetcher = TargetSelectorFetcher::Native(NativeFetcher::new(FixedLookup::new(Ok(
            Some(LabelSelector::new()),
        ))));
        let workload = WorkloadRef::new("default", "web").with_target_ref(deployment());

        assert!(matches!(
            fetcher.fetch(&workload).await,
            FetchOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn unknown_kind_goes_through_scale_subresource() {
        let lookup = FixedLookup::new(Ok(Some(native_selector())));
        let fetcher = TargetSelectorFetcher::Native(NativeFetcher::new(lookup.clone()));
        let workload = WorkloadRef::new("default", "custom")
            .with_target_ref(TargetRef::new("example.com/v1", "Rollout", "custom"));

        assert_eq!(
            fetcher.fetch(&workload).await,
            FetchOutcome::Found(native_selector())
        );
        assert_eq!(
            lookup.scale_calls.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn native_declines_incomplete_target_ref_without_lookup() {
        let lookup = FixedLookup::new(Ok(Some(native_selector())));
        let fetcher = TargetSelectorFetcher::Native(NativeFetcher::new(lookup.clone()));
        let workload = WorkloadRef::new("default", "custom")
            .with_target_ref(TargetRef::new("example.com/v1", "", "custom"));

        assert!(!fetcher.handles(&workload));
        assert_eq!(fetcher.fetch(&workload).await, FetchOutcome::Declined);
        assert_eq!(
            lookup.scale_calls.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn legacy_declines_exactly_when_it_does_not_handle() {
        let fetcher = TargetSelectorFetcher::Legacy(LegacyFetcher::new());
        let native_only = WorkloadRef::new("default", "web").with_target_ref(deployment());
        let inline = WorkloadRef::new("default", "old").with_legacy_selector(legacy_selector());

        assert!(!fetcher.handles(&native_only));
        assert_eq!(fetcher.fetch(&native_only).await, FetchOutcome::Declined);
        assert!(fetcher.handles(&inline));
        assert_eq!(
            fetcher.fetch(&inline).await,
            FetchOutcome::Found(legacy_selector())
        );
    }

    #[test]
    fn legacy_rejects_in_requirement_without_values() {
        let selector = LabelSelector::new().with_expression(LabelRequirement {
            key: "tier".to_string(),
            operator: SelectorOperator::In,
            values: vec![],
        });
        let workload = WorkloadRef::new("default", "old").with_legacy_selector(selector.clone());
        assert!(matches!(
            LegacyFetcher::fetch(&workload, &selector),
            FetchOutcome::Failed(_)
        ));
    }
}
