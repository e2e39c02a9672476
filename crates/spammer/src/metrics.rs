//! Periodic metrics recording.
//!
//! While a simulation runs, a dedicated task polls the target service for a
//! fixed set of metrics and appends one JSON object per poll to a log file.
//! A failed poll is logged and skipped; the recorder only stops when the run
//! is cancelled.

use crate::client::{ClientError, TargetService};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Time between metric polls.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// Key holding the poll time in each log line.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Queue and storage timings worth watching during a fleet simulation.
pub fn default_metrics() -> BTreeMap<String, String> {
    [
        (
            "replace_facts_time",
            "puppetlabs.puppetdb.storage:name=replace-facts-time",
        ),
        ("queue_time", "puppetlabs.puppetdb.mq:name=global.queue-time"),
        (
            "command_parse_time",
            "puppetlabs.puppetdb.mq:name=global.command-parse-time",
        ),
        ("queue_depth", "puppetlabs.puppetdb.mq:name=global.depth"),
    ]
    .into_iter()
    .map(|(key, mbean)| (key.to_string(), mbean.to_string()))
    .collect()
}

/// Log file name for a run: `simulation-logs-<hosts>-<minutes>-<start>.txt`.
pub fn default_log_path(hosts: usize, run_interval: Duration, started: SystemTime) -> PathBuf {
    let minutes = run_interval.as_secs() / 60;
    let stamp = humantime::format_rfc3339_seconds(started);
    PathBuf::from(format!("simulation-logs-{hosts}-{minutes}-{stamp}.txt"))
}

/// One log line: the metric values plus a `timestamp`, newline terminated.
pub fn format_line(mut values: Map<String, Value>, timestamp: SystemTime) -> String {
    values.insert(
        TIMESTAMP_KEY.to_string(),
        Value::String(humantime::format_rfc3339_millis(timestamp).to_string()),
    );
    let mut line = Value::Object(values).to_string();
    line.push('\n');
    line
}

/// Counts of what the recorder did over its lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecorderSummary {
    pub recorded: u64,
    pub failed: u64,
}

/// Polls metrics on an interval and appends them to a file.
#[derive(Clone, Debug)]
pub struct MetricsRecorder {
    names: BTreeMap<String, String>,
    output: PathBuf,
    interval: Duration,
}

impl MetricsRecorder {
    /// Create a recorder writing `names` to `output` every minute.
    pub fn new(names: BTreeMap<String, String>, output: impl Into<PathBuf>) -> Self {
        Self {
            names,
            output: output.into(),
            interval: DEFAULT_METRICS_INTERVAL,
        }
    }

    /// Set the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// File the recorder appends to.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Poll until cancelled. The first poll happens immediately.
    pub async fn run<S: TargetService>(
        &self,
        service: &S,
        cancel: CancellationToken,
    ) -> RecorderSummary {
        info!(
            output = %self.output.display(),
            metrics = self.names.len(),
            interval = ?self.interval,
            "Recording metrics"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut summary = RecorderSummary::default();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.record_once(service).await {
                Ok(()) => summary.recorded += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(error = %e, "Skipping metrics tick");
                }
            }
        }

        debug!(
            recorded = summary.recorded,
            failed = summary.failed,
            "Metrics recorder stopped"
        );
        summary
    }

    /// Poll once and append the result.
    pub async fn record_once<S: TargetService>(&self, service: &S) -> Result<(), MetricsError> {
        let values = service.fetch_metrics(&self.names).await?;
        let line = format_line(values, SystemTime::now());
        self.append(&line).await
    }

    async fn append(&self, line: &str) -> Result<(), MetricsError> {
        let write_error = |source| MetricsError::Write {
            path: self.output.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output)
            .await
            .map_err(write_error)?;
        file.write_all(line.as_bytes()).await.map_err(write_error)?;
        file.flush().await.map_err(write_error)
    }
}

/// Errors from a single metrics tick.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Metrics poll failed: {0}")]
    Poll(#[from] ClientError),

    #[error("Failed to append metrics to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
