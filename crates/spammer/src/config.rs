//! Configuration types for a simulation run.

use crate::client::ClientConfig;
use crate::metrics::{default_log_path, default_metrics, DEFAULT_METRICS_INTERVAL};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// Configuration for a fleet simulation.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Target service connection settings.
    pub client: ClientConfig,

    /// Root of the sample corpus (`facts/`, `reports/`, `catalogs/`).
    pub samples_dir: PathBuf,

    /// Number of simulated hosts.
    pub hosts: usize,

    /// How often each host reports.
    pub run_interval: Duration,

    /// Number of concurrent submission workers.
    pub workers: usize,

    /// Commands drawn per worker before dispatching them together.
    pub batch_size: usize,

    /// Merge orphan facts into every facts command.
    pub orphans: bool,

    /// Random seed for sample assignment and drift.
    pub seed: u64,

    /// Metrics recording, if enabled.
    pub metrics: Option<MetricsConfig>,
}

impl SimulationConfig {
    /// Create a configuration targeting `client` with default fleet settings.
    pub fn new(client: ClientConfig) -> Self {
        Self {
            client,
            samples_dir: PathBuf::from("./samples"),
            hosts: 100,
            run_interval: Duration::from_secs(30 * 60),
            workers: 8,
            batch_size: 10,
            orphans: false,
            seed: 12345,
            metrics: Some(MetricsConfig::default()),
        }
    }

    /// Set the sample corpus directory.
    pub fn with_samples_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.samples_dir = dir.into();
        self
    }

    /// Set the number of simulated hosts.
    pub fn with_hosts(mut self, hosts: usize) -> Self {
        self.hosts = hosts;
        self
    }

    /// Set the per-host reporting interval.
    pub fn with_run_interval(mut self, interval: Duration) -> Self {
        self.run_interval = interval;
        self
    }

    /// Set the number of submission workers (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the batch size (at least one).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Enable or disable orphan facts.
    pub fn with_orphans(mut self, orphans: bool) -> Self {
        self.orphans = orphans;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set or disable metrics recording.
    pub fn with_metrics(mut self, metrics: Option<MetricsConfig>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Commands per second the simulated fleet should produce at steady
    /// state.
    pub fn expected_rate(&self) -> f64 {
        expected_rate(self.hosts, self.run_interval)
    }

    /// Where metrics go for a run started at `started`.
    pub fn metrics_path(&self, started: SystemTime) -> Option<PathBuf> {
        let metrics = self.metrics.as_ref()?;
        Some(
            metrics
                .output
                .clone()
                .unwrap_or_else(|| default_log_path(self.hosts, self.run_interval, started)),
        )
    }
}

/// Commands per second produced by `hosts` hosts reporting every `interval`.
pub fn expected_rate(hosts: usize, interval: Duration) -> f64 {
    if interval.is_zero() {
        return 0.0;
    }
    hosts as f64 / interval.as_secs_f64()
}

/// Metrics recording configuration.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Log key to service metric name.
    pub names: BTreeMap<String, String>,

    /// Output file. Defaults to a name derived from the run parameters.
    pub output: Option<PathBuf>,

    /// Time between polls.
    pub interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            names: default_metrics(),
            output: None,
            interval: DEFAULT_METRICS_INTERVAL,
        }
    }
}

impl MetricsConfig {
    /// Set the output file.
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Set the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}
