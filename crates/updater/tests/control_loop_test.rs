//! End-to-end control loop runs over a snapshot loaded from disk.
//!
//! # Quality Standards
//! - Zero unwraps in tests
//! - Paused time; the loop is stopped through its stopper handle

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use rightsizer_updater::{
    CompositeTargetSelectorFetcher, ControlLoop, CycleExecutorBuilder, DriftEvictionDecider,
    HealthCheck, InMemoryCluster, LivenessState, LoopConfig, PodRef,
};
use tokio::time::Instant;

type TestResult = std::result::Result<(), String>;

const SNAPSHOT: &str = r#"{
    "controllers": [
        {
            "namespace": "shop",
            "target": {"apiVersion": "apps/v1", "kind": "Deployment", "name": "cart"},
            "selector": {"matchLabels": {"app": "cart"}}
        }
    ],
    "workloads": [
        {
            "reference": {
                "namespace": "shop",
                "name": "cart-vpa",
                "targetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": "cart"}
            },
            "replicas": 4,
            "recommendation": {"cpuMillis": 250, "memoryBytes": 536870912}
        },
        {
            "reference": {
                "namespace": "shop",
                "name": "search-vpa",
                "legacySelector": {"matchLabels": {"app": "search"}}
            },
            "replicas": 2,
            "recommendation": {"cpuMillis": 500, "memoryBytes": 1073741824}
        }
    ],
    "pods": [
        {"reference": {"namespace": "shop", "name": "cart-0"}, "labels": {"app": "cart"},
         "requests": {"cpuMillis": 1000, "memoryBytes": 536870912}},
        {"reference": {"namespace": "shop", "name": "cart-1"}, "labels": {"app": "cart"},
         "requests": {"cpuMillis": 250, "memoryBytes": 536870912}},
        {"reference": {"namespace": "shop", "name": "cart-2"}, "labels": {"app": "cart"},
         "requests": {"cpuMillis": 400, "memoryBytes": 536870912}},
        {"reference": {"namespace": "shop", "name": "cart-3"}, "labels": {"app": "cart"},
         "requests": {"cpuMillis": 300, "memoryBytes": 536870912}},
        {"reference": {"namespace": "shop", "name": "search-0"}, "labels": {"app": "search"},
         "requests": {"cpuMillis": 500, "memoryBytes": 1073741824}},
        {"reference": {"namespace": "shop", "name": "search-1"}, "labels": {"app": "search"},
         "requests": {"cpuMillis": 100, "memoryBytes": 1073741824}}
    ]
}"#;

fn write_snapshot() -> Result<tempfile::NamedTempFile, String> {
    let mut file =
        tempfile::NamedTempFile::new().map_err(|e| format!("temp file should open: {e}"))?;
    file.write_all(SNAPSHOT.as_bytes())
        .map_err(|e| format!("snapshot should write: {e}"))?;
    Ok(file)
}

/// Given a snapshot with drifted pods in two workloads
/// When the loop runs two cycles
/// Then the most drifted pods are evicted within tolerance and liveness is fresh
#[tokio::test(start_paused = true)]
async fn loop_rightsizes_drifted_pods() -> TestResult {
    let file = write_snapshot()?;
    let cluster = Arc::new(
        InMemoryCluster::load(file.path()).map_err(|e| format!("snapshot should load: {e}"))?,
    );

    let config = LoopConfig::default().with_interval(Duration::from_secs(1));
    let executor = CycleExecutorBuilder::new()
        .with_config(config.clone())
        .with_inventory(cluster.clone())
        .with_resolver(Arc::new(CompositeTargetSelectorFetcher::native_then_legacy(
            cluster.clone(),
        )))
        .with_decider(Arc::new(DriftEvictionDecider::default()))
        .with_sink(cluster.clone())
        .build()
        .map_err(|e| format!("executor should build: {e}"))?;

    let liveness = Arc::new(LivenessState::new());
    let health = HealthCheck::for_interval(liveness.clone(), config.interval, 5);
    let mut control = ControlLoop::new(Arc::new(executor), liveness.clone(), config.interval)
        .map_err(|e| format!("loop should start: {e}"))?;
    let stopper = control.stopper();
    let handle = tokio::spawn(async move { control.run().await });

    tokio::time::sleep(Duration::from_millis(2500)).await;
    stopper.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .map_err(|_| "loop should stop".to_string())?
        .map_err(|e| format!("loop task should not panic: {e}"))?;

    // First cycle: cart cap is 2 (cart-0, then cart-2); search cap is 1.
    // Second cycle: cart-3 is the only drifted cart pod left.
    assert_eq!(
        cluster.evicted().await,
        vec![
            PodRef::new("shop", "cart-0"),
            PodRef::new("shop", "cart-2"),
            PodRef::new("shop", "search-1"),
            PodRef::new("shop", "cart-3"),
        ]
    );
    assert_eq!(liveness.marks(), 2);
    assert!(health.check(Instant::now()).is_healthy());
    Ok(())
}

/// Given a loop that stopped running cycles
/// When more than five intervals pass
/// Then the health check reports it stale
#[tokio::test(start_paused = true)]
async fn stopped_loop_goes_stale() -> TestResult {
    let cluster = Arc::new(
        InMemoryCluster::from_json(SNAPSHOT).map_err(|e| format!("snapshot should parse: {e}"))?,
    );
    let executor = CycleExecutorBuilder::new()
        .with_config(LoopConfig::default().with_interval(Duration::from_secs(1)))
        .with_inventory(cluster.clone())
        .with_resolver(Arc::new(CompositeTargetSelectorFetcher::native_then_legacy(
            cluster.clone(),
        )))
        .with_decider(Arc::new(DriftEvictionDecider::default()))
        .with_sink(cluster)
        .build()
        .map_err(|e| format!("executor should build: {e}"))?;

    let liveness = Arc::new(LivenessState::new());
    let health = HealthCheck::for_interval(liveness.clone(), Duration::from_secs(1), 5);
    let mut control = ControlLoop::new(Arc::new(executor), liveness, Duration::from_secs(1))
        .map_err(|e| format!("loop should start: {e}"))?;
    let stopper = control.stopper();
    let handle = tokio::spawn(async move { control.run().await });

    tokio::time::sleep(Duration::from_millis(1500)).await;
    stopper.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .map_err(|_| "loop should stop".to_string())?
        .map_err(|e| format!("loop task should not panic: {e}"))?;

    tokio::time::advance(Duration::from_secs(4)).await;
    assert!(health.check(Instant::now()).is_healthy());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!health.check(Instant::now()).is_healthy());
    Ok(())
}

/// Given the bundled demo snapshot
/// When one cycle runs against it
/// Then every resolution path is exercised and the small workload is left alone
#[tokio::test(start_paused = true)]
async fn demo_snapshot_single_cycle() -> TestResult {
    let cluster = Arc::new(
        InMemoryCluster::from_json(include_str!("../../../demos/cluster.json"))
            .map_err(|e| format!("demo snapshot should parse: {e}"))?,
    );
    let executor = CycleExecutorBuilder::new()
        .with_inventory(cluster.clone())
        .with_resolver(Arc::new(CompositeTargetSelectorFetcher::native_then_legacy(
            cluster.clone(),
        )))
        .with_decider(Arc::new(DriftEvictionDecider::default()))
        .with_sink(cluster.clone())
        .build()
        .map_err(|e| format!("executor should build: {e}"))?;

    let outcome = executor
        .run_once(Instant::now() + Duration::from_secs(60))
        .await;
    let report = outcome
        .report()
        .ok_or_else(|| format!("expected a report, got {}", outcome.label()))?;

    assert_eq!(outcome.label(), "success");
    assert_eq!(report.workloads_processed, 4);
    assert_eq!(report.skipped_below_min_replicas, 1);
    assert_eq!(
        cluster.evicted().await,
        vec![
            PodRef::new("shop", "cart-0"),
            PodRef::new("shop", "cart-2"),
            PodRef::new("shop", "checkout-0"),
            PodRef::new("shop", "search-1"),
        ]
    );
    Ok(())
}
