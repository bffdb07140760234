//! CLI definitions using clap.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use rightsizer_updater::LoopConfig;

/// Rightsizer updater
#[derive(Parser, Debug)]
#[command(name = "rightsizer")]
#[command(version)]
#[command(about = "Evicts pods whose resources drifted from their recommendation")]
#[command(
    long_about = "Runs the updater control loop: every interval it reads the managed workloads, \
                  resolves their pods, and evicts drifted replicas within a per-workload \
                  tolerance and a global eviction rate limit."
)]
pub struct Cli {
    /// How often the updater runs a cycle (e.g. 60s, 1m30s, 2h)
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    pub updater_interval: Duration,

    /// Minimum replica count a workload needs before any pod is evicted
    #[arg(long, default_value_t = 2)]
    pub min_replicas: u32,

    /// Fraction of a workload's replicas that may be evicted in one cycle
    #[arg(long, default_value_t = 0.5)]
    pub eviction_tolerance: f64,

    /// Evictions per second across all workloads; negative disables limiting
    #[arg(long, default_value_t = -1.0, allow_negative_numbers = true)]
    pub eviction_rate_limit: f64,

    /// Evictions allowed back to back before the rate limit applies
    #[arg(long, default_value_t = 1)]
    pub eviction_rate_limit_burst: u32,

    /// Address the health check is served on
    #[arg(long, default_value = "0.0.0.0:8943")]
    pub address: SocketAddr,

    /// Intervals without a completed cycle before the health check fails
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub health_check_multiplier: u32,

    /// Cluster snapshot (JSON) backing the in-memory cluster
    #[arg(long)]
    pub snapshot: PathBuf,
}

impl Cli {
    /// Loop configuration from the parsed flags. Not validated yet.
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig::default()
            .with_interval(self.updater_interval)
            .with_min_replicas(self.min_replicas)
            .with_eviction_tolerance(self.eviction_tolerance)
            .with_rate_limit(self.eviction_rate_limit, self.eviction_rate_limit_burst)
    }
}
