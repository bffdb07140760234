//! # Rightsizer updater
//!
//! Entry point for the updater process.
//!
//! ## Initialization Sequence
//!
//! 1. **Configuration** - Parse flags and validate the loop configuration
//! 2. **Cluster** - Load the cluster snapshot behind the in-memory cluster
//! 3. **Cycle Executor** - Wire resolver, rate limiter, decider and sink
//! 4. **Health Check** - Bind the health-check listener and start serving
//! 5. **Control Loop** - Run cycles until Ctrl+C
//!
//! ## Error Handling
//!
//! Any failure before the loop starts halts the process with a non-zero exit.
//! Once the loop runs, cycle failures are logged and never stop it.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rightsizer_updater::{
    CompositeTargetSelectorFetcher, ControlLoop, CycleExecutorBuilder, DriftEvictionDecider,
    EvictionRateLimiter, HealthCheck, InMemoryCluster, LivenessState,
};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("Updater failed to start: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.loop_config();
    config.validate().context("Invalid updater configuration")?;
    info!(
        interval_ms = config.interval.as_millis(),
        min_replicas = config.min_replicas,
        eviction_tolerance = config.eviction_tolerance,
        eviction_rate_limit = config.eviction_rate_limit,
        eviction_rate_limit_burst = config.eviction_rate_limit_burst,
        "Rightsizer updater starting"
    );

    let cluster = Arc::new(InMemoryCluster::load(&cli.snapshot).with_context(|| {
        format!("Failed to load cluster snapshot from {}", cli.snapshot.display())
    })?);

    let limiter = Arc::new(EvictionRateLimiter::from_config(&config));
    if limiter.is_unlimited() {
        info!("Eviction rate limiting disabled");
    }

    let executor = CycleExecutorBuilder::new()
        .with_config(config.clone())
        .with_inventory(cluster.clone())
        .with_resolver(Arc::new(CompositeTargetSelectorFetcher::native_then_legacy(
            cluster.clone(),
        )))
        .with_decider(Arc::new(DriftEvictionDecider::default()))
        .with_sink(cluster)
        .with_limiter(limiter)
        .build()
        .context("Failed to build cycle executor")?;

    let liveness = Arc::new(LivenessState::new());
    let health = HealthCheck::for_interval(
        liveness.clone(),
        config.interval,
        cli.health_check_multiplier,
    );

    let listener = rightsizer_web::bind(cli.address)
        .await
        .context("Failed to start health check")?;
    tokio::spawn(async move {
        if let Err(e) = rightsizer_web::serve(listener, rightsizer_web::health_router(health)).await
        {
            error!("Health check server stopped: {}", e);
        }
    });

    let mut control = ControlLoop::new(Arc::new(executor), liveness, config.interval)
        .context("Failed to start control loop")?;
    let stopper = control.stopper();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating graceful shutdown");
                stopper.stop();
            }
            Err(err) => error!("Failed to listen for shutdown signal: {}", err),
        }
    });

    info!("Updater is running. Press Ctrl+C to stop.");
    control.run().await;

    info!("Updater stopped gracefully");
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
