//! Submission engine.
//!
//! A fixed pool of workers drains the shared [`HostSchedule`]. Each worker
//! draws a batch of due hosts, submits their facts commands concurrently,
//! waits for the whole batch, and repeats until the run is cancelled. A
//! separate task records service metrics while the workers run.

use crate::client::{TargetService, SubmissionResult};
use crate::config::SimulationConfig;
use crate::corpus::SampleCorpus;
use crate::metrics::{MetricsRecorder, RecorderSummary};
use crate::schedule::{HostCommands, HostSchedule, ScheduleError};
use dashmap::DashMap;
use fleetload_types::{CommandKind, Document};
use futures::future::join_all;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Batch size used when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Longest payload excerpt included in failure diagnostics.
const PAYLOAD_PREVIEW_CHARS: usize = 256;

/// Drives concurrent submission workers against a target service.
pub struct Simulator<S> {
    schedule: Arc<HostSchedule>,
    service: Arc<S>,
    workers: usize,
    batch_size: usize,
    seed: u64,
    metrics: Option<MetricsRecorder>,
}

impl<S: TargetService> Simulator<S> {
    /// Create a simulator with one worker and no metrics recording.
    pub fn new(schedule: Arc<HostSchedule>, service: Arc<S>) -> Self {
        Self {
            schedule,
            service,
            workers: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            seed: 0,
            metrics: None,
        }
    }

    /// Build the schedule and simulator described by `config`.
    pub fn from_config(
        config: &SimulationConfig,
        corpus: Arc<SampleCorpus>,
        service: Arc<S>,
        started: SystemTime,
    ) -> Result<Self, ScheduleError> {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let schedule = HostSchedule::build(corpus, config.hosts, config.run_interval, &mut rng)?
            .with_orphans(config.orphans);

        let metrics = config.metrics.as_ref().and_then(|metrics| {
            let output = config.metrics_path(started)?;
            Some(MetricsRecorder::new(metrics.names.clone(), output).with_interval(metrics.interval))
        });

        Ok(Self::new(Arc::new(schedule), service)
            .with_workers(config.workers)
            .with_batch_size(config.batch_size)
            .with_seed(config.seed)
            .with_metrics(metrics))
    }

    /// Set the number of workers (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the batch size (at least one).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the seed workers derive their RNGs from.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Record metrics alongside the workers.
    pub fn with_metrics(mut self, recorder: Option<MetricsRecorder>) -> Self {
        self.metrics = recorder;
        self
    }

    /// The schedule workers draw from.
    pub fn schedule(&self) -> &Arc<HostSchedule> {
        &self.schedule
    }

    /// Run for a fixed duration, then cancel and report.
    pub async fn run_for(&self, duration: Duration) -> SimulationReport {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            stop.cancel();
        });

        let report = self.simulate(cancel).await;
        timer.abort();
        report
    }

    /// Run until `cancel` fires. The whole run stops as a unit; in-flight
    /// submissions are abandoned.
    pub async fn simulate(&self, cancel: CancellationToken) -> SimulationReport {
        info!(
            hosts = self.schedule.host_count(),
            interval = ?self.schedule.interval(),
            workers = self.workers,
            batch_size = self.batch_size,
            "Starting simulation"
        );

        let stats = Arc::new(SubmissionStats::new());
        let tracker = TaskTracker::new();
        let start = Instant::now();

        for worker in 0..self.workers {
            let worker = Worker {
                id: worker,
                schedule: self.schedule.clone(),
                service: self.service.clone(),
                stats: stats.clone(),
                batch_size: self.batch_size,
                rng: ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(worker as u64)),
            };
            tracker.spawn(worker.run(cancel.clone()));
        }

        let metrics = self.metrics.clone().map(|recorder| {
            let service = self.service.clone();
            let cancel = cancel.clone();
            tracker.spawn(async move { recorder.run(&*service, cancel).await })
        });

        tracker.close();
        tracker.wait().await;

        let metrics = match metrics {
            Some(handle) => match handle.await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!(error = %e, "Metrics task failed");
                    None
                }
            },
            None => None,
        };

        let report = stats.report(start.elapsed(), metrics);
        info!(
            submitted = report.submitted,
            accepted = report.accepted,
            throughput = report.throughput(),
            "Simulation stopped"
        );
        report
    }
}

/// One submission worker's state.
///
/// Hosts go back into the schedule as soon as they are drawn, before their
/// batch is sent. When `batch_size` draws span more than one of a host's
/// intervals, the same host can appear twice in one batch and both copies
/// are submitted concurrently. Keep `batch_size` well below the number of
/// hosts to avoid this.
struct Worker<S> {
    id: usize,
    schedule: Arc<HostSchedule>,
    service: Arc<S>,
    stats: Arc<SubmissionStats>,
    batch_size: usize,
    rng: ChaCha8Rng,
}

impl<S: TargetService> Worker<S> {
    async fn run(mut self, cancel: CancellationToken) {
        debug!(worker = self.id, "Worker started");

        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = self.draw_batch() => batch,
            };

            // Reports and catalogs are drawn with each host but only facts
            // are submitted.
            let submissions = batch.iter().map(|commands| self.submit_facts(commands));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = join_all(submissions) => {}
            }
        }

        debug!(worker = self.id, "Worker stopped");
    }

    async fn draw_batch(&mut self) -> Vec<HostCommands> {
        let mut batch = Vec::with_capacity(self.batch_size);
        for _ in 0..self.batch_size {
            batch.push(self.schedule.next(&mut self.rng).await);
        }
        batch
    }

    async fn submit_facts(&self, commands: &HostCommands) {
        let kind = CommandKind::Facts;
        let certname = commands.certname();
        let started = Instant::now();
        let result = self
            .service
            .submit(kind, &certname, &commands.facts)
            .await;
        let latency = started.elapsed();

        match result {
            Ok(result) => {
                if !result.is_success() {
                    warn!(
                        method = "POST",
                        command = kind.command_name(),
                        version = kind.version(),
                        certname = %certname,
                        payload = %payload_preview(&commands.facts),
                        status = result.status_code,
                        body = %result.body,
                        "Command rejected"
                    );
                }
                self.stats.record_response(&result, latency);
            }
            Err(e) => {
                warn!(
                    method = "POST",
                    command = kind.command_name(),
                    version = kind.version(),
                    certname = %certname,
                    payload = %payload_preview(&commands.facts),
                    error = %e,
                    "Command submission failed"
                );
                self.stats.record_transport_error();
            }
        }
    }
}

fn payload_preview(doc: &Document) -> String {
    let text = Value::Object(doc.clone()).to_string();
    match text.char_indices().nth(PAYLOAD_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}

/// Counters shared by all workers.
struct SubmissionStats {
    submitted: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    transport_errors: AtomicU64,
    statuses: DashMap<u16, u64>,
    /// Submission latency in microseconds.
    latency: Mutex<Histogram<u64>>,
}

impl SubmissionStats {
    fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            statuses: DashMap::new(),
            latency: Mutex::new(new_latency_histogram()),
        }
    }

    fn record_response(&self, result: &SubmissionResult, latency: Duration) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        if result.is_success() {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        *self.statuses.entry(result.status_code).or_insert(0) += 1;
        self.latency
            .lock()
            .saturating_record(latency.as_micros().min(u64::MAX as u128) as u64);
    }

    fn record_transport_error(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self, elapsed: Duration, metrics: Option<RecorderSummary>) -> SimulationReport {
        SimulationReport {
            elapsed,
            submitted: self.submitted.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            status_counts: self
                .statuses
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
            latency: self.latency.lock().clone(),
            metrics,
        }
    }
}

fn new_latency_histogram() -> Histogram<u64> {
    // Auto-resizing; three significant figures is always a valid precision.
    Histogram::new(3).expect("valid histogram precision")
}

/// Outcome of a simulation run.
#[derive(Clone, Debug)]
pub struct SimulationReport {
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Commands sent, whatever the outcome.
    pub submitted: u64,
    /// Commands answered with a 2xx status.
    pub accepted: u64,
    /// Commands answered with any other status.
    pub rejected: u64,
    /// Commands that never got a response.
    pub transport_errors: u64,
    /// Responses per HTTP status.
    pub status_counts: BTreeMap<u16, u64>,
    /// Submission latency histogram, in microseconds.
    pub latency: Histogram<u64>,
    /// What the metrics recorder did, if it ran.
    pub metrics: Option<RecorderSummary>,
}

impl SimulationReport {
    /// Commands submitted per second of run time.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.submitted as f64 / secs
    }

    /// Latency at quantile `q` (0.0 to 1.0) of responded submissions.
    pub fn latency_at(&self, q: f64) -> Duration {
        Duration::from_micros(self.latency.value_at_quantile(q))
    }

    /// Median submission latency.
    pub fn p50_latency(&self) -> Duration {
        self.latency_at(0.5)
    }

    /// 99th percentile submission latency.
    pub fn p99_latency(&self) -> Duration {
        self.latency_at(0.99)
    }

    /// Print a human-readable summary to stdout.
    pub fn print(&self) {
        println!("=== Simulation Report ===");
        println!("Elapsed:          {:?}", self.elapsed);
        println!("Submitted:        {}", self.submitted);
        println!("Accepted:         {}", self.accepted);
        println!("Rejected:         {}", self.rejected);
        println!("Transport errors: {}", self.transport_errors);
        println!("Throughput:       {:.2} commands/s", self.throughput());
        if !self.latency.is_empty() {
            println!("Latency p50:      {:?}", self.p50_latency());
            println!("Latency p99:      {:?}", self.p99_latency());
            println!(
                "Latency max:      {:?}",
                Duration::from_micros(self.latency.max())
            );
        }
        for (status, count) in &self.status_counts {
            println!("  HTTP {status}: {count}");
        }
        if let Some(metrics) = &self.metrics {
            println!(
                "Metrics ticks:    {} recorded, {} failed",
                metrics.recorded, metrics.failed
            );
        }
    }
}
