//! Fleet simulator CLI
//!
//! A command-line tool for generating fleet-sized command load against a
//! PuppetDB-style ingestion service.

use clap::{Parser, Subcommand};
use fleetload_spammer::client::JsonArrayWriter;
use fleetload_spammer::config::{expected_rate, MetricsConfig, SimulationConfig};
use fleetload_spammer::corpus::SampleCorpus;
use fleetload_spammer::query::{replay, QuerySets, ReplayReport};
use fleetload_spammer::runner::Simulator;
use fleetload_spammer::{ClientConfig, IngestClient};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetload")]
#[command(about = "Fleet command simulator for PuppetDB-style services")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a fleet of hosts submitting facts on a fixed interval
    Simulate {
        /// Target service host
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Target service port
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Number of simulated hosts
        #[arg(long, default_value = "100")]
        hosts: usize,

        /// Minutes between each host's submissions
        #[arg(long, default_value = "30")]
        run_interval: u64,

        /// Number of concurrent submission workers
        #[arg(long, default_value = "8")]
        workers: usize,

        /// Commands each worker draws before dispatching them together
        #[arg(long, default_value = "10")]
        batch_size: usize,

        /// Add deterministic orphan facts to every facts command
        #[arg(long)]
        orphans: bool,

        /// Sample corpus directory (facts/, reports/, catalogs/)
        #[arg(long, default_value = "./samples")]
        samples: PathBuf,

        /// Metrics log file (defaults to a name derived from the run)
        #[arg(long)]
        metrics_file: Option<PathBuf>,

        /// Do not record service metrics
        #[arg(long, conflicts_with = "metrics_file")]
        no_metrics: bool,

        /// Random seed for sample assignment and drift
        #[arg(long, default_value = "12345")]
        seed: u64,

        /// Stop after this long (e.g., "30s", "5m", "1h"); runs until Ctrl-C otherwise
        #[arg(short, long)]
        duration: Option<humantime::Duration>,

        /// Wait for the service to be ready before starting
        #[arg(long)]
        wait_ready: bool,
    },

    /// Run one query and print the results as a JSON array
    Query {
        /// Target service host
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Target service port
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Query expression, as JSON
        filter: String,
    },

    /// Replay a named set of queries from a TOML file
    Replay {
        /// Target service host
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Target service port
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Query set file
        #[arg(long)]
        config: PathBuf,

        /// Name of the set to replay
        #[arg(long)]
        set: String,

        /// Times to replay the set
        #[arg(long, default_value = "1")]
        iterations: u32,
    },

    /// Print the steady-state command rate of a fleet
    ExpectedRate {
        /// Number of simulated hosts
        #[arg(long, default_value = "100")]
        hosts: usize,

        /// Minutes between each host's submissions
        #[arg(long, default_value = "30")]
        run_interval: u64,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::ExpectedRate {
            hosts,
            run_interval,
        } => {
            // No tracing here; output is just the number
            println!("{:.4}", expected_rate(hosts, minutes(run_interval)));
        }

        Commands::Query { host, port, filter } => {
            init_tracing();

            let filter: Value = serde_json::from_str(&filter)?;
            let client = IngestClient::new(&ClientConfig::from_host_port(&host, port))?;
            let mut records = client.query(&filter).await?;

            let stdout = std::io::stdout();
            let mut writer = JsonArrayWriter::new(stdout.lock());
            while let Some(record) = records.next().await {
                writer.write(&record?)?;
            }
            writer.finish()?;
        }

        Commands::Replay {
            host,
            port,
            config,
            set,
            iterations,
        } => {
            init_tracing();

            let sets = QuerySets::from_file(&config)?;
            let specs = sets.get(&set)?;
            let client = IngestClient::new(&ClientConfig::from_host_port(&host, port))?;

            let mut total = ReplayReport::default();
            for _ in 0..iterations {
                let report = replay(&client, specs).await;
                total.succeeded += report.succeeded;
                total.failed += report.failed;
            }
            println!(
                "Replayed {} queries: {} succeeded, {} failed",
                total.succeeded + total.failed,
                total.succeeded,
                total.failed
            );
        }

        Commands::Simulate {
            host,
            port,
            hosts,
            run_interval,
            workers,
            batch_size,
            orphans,
            samples,
            metrics_file,
            no_metrics,
            seed,
            duration,
            wait_ready,
        } => {
            init_tracing();

            let metrics = if no_metrics {
                None
            } else {
                let metrics = MetricsConfig::default();
                Some(match metrics_file {
                    Some(path) => metrics.with_output(path),
                    None => metrics,
                })
            };

            let config = SimulationConfig::new(ClientConfig::from_host_port(&host, port))
                .with_samples_dir(samples)
                .with_hosts(hosts)
                .with_run_interval(minutes(run_interval))
                .with_workers(workers)
                .with_batch_size(batch_size)
                .with_orphans(orphans)
                .with_seed(seed)
                .with_metrics(metrics);

            let corpus = Arc::new(SampleCorpus::load(&config.samples_dir)?);
            let client = Arc::new(IngestClient::new(&config.client)?);

            if wait_ready {
                println!("Waiting for service to be ready...");
                client.wait_for_ready(Duration::from_secs(60)).await?;
                println!("Service ready.");
            }

            let simulator = Simulator::from_config(&config, corpus, client, SystemTime::now())?;
            println!(
                "Simulating {} hosts every {} minutes ({:.2} commands/s)",
                config.hosts,
                run_interval,
                config.expected_rate()
            );

            let report = match duration {
                Some(duration) => simulator.run_for(*duration).await,
                None => {
                    let cancel = CancellationToken::new();
                    let stop = cancel.clone();
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            stop.cancel();
                        }
                    });
                    simulator.simulate(cancel).await
                }
            };
            report.print();
        }
    }

    Ok(())
}
