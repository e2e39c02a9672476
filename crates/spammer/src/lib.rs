//! Fleet command simulator.
//!
//! Simulates a fleet of configuration-managed hosts reporting to a
//! PuppetDB-style ingestion service. Each host re-submits a facts command on a
//! fixed interval, built from a shared corpus of sample documents with small
//! numeric drift applied, so the service sees a steady, realistic write load.
//!
//! # Modules
//!
//! - [`corpus`]: loads sample facts, reports and catalogs from disk
//! - [`mutation`]: numeric drift and orphan fact generation
//! - [`schedule`]: due-time ordered host queue that paces submissions
//! - [`runner`]: worker pool that drains the schedule
//! - [`metrics`]: periodic metrics recording to a log file
//! - [`client`]: HTTP client for the command, query and metrics APIs
//! - [`query`]: replay of named query sets

pub mod client;
pub mod config;
pub mod corpus;
pub mod metrics;
pub mod mutation;
pub mod query;
pub mod runner;
pub mod schedule;

#[cfg(test)]
mod testing;

pub use client::{ClientConfig, ClientError, IngestClient, SubmissionResult, TargetService};
pub use config::{expected_rate, MetricsConfig, SimulationConfig};
pub use corpus::{CorpusError, SampleCorpus};
pub use metrics::{MetricsRecorder, RecorderSummary};
pub use runner::{SimulationReport, Simulator};
pub use schedule::{HostCommands, HostSchedule, ScheduleError};
