//! In-memory [`TargetService`] for engine tests.

use crate::client::{ClientError, SubmissionResult, TargetService};
use fleetload_types::{CommandKind, Document};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One command the fake service received.
#[derive(Clone, Debug)]
pub struct Received {
    pub kind: CommandKind,
    pub certname: String,
    pub body: Document,
    pub at: tokio::time::Instant,
}

/// Records submissions and answers with a fixed status.
pub struct FakeService {
    status: u16,
    latency: Duration,
    /// Metric polls with these (0-based) indices fail.
    failing_polls: Vec<usize>,
    polls: AtomicUsize,
    received: Mutex<Vec<Received>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            status: 200,
            latency: Duration::ZERO,
            failing_polls: Vec::new(),
            polls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_failing_polls(mut self, polls: Vec<usize>) -> Self {
        self.failing_polls = polls;
        self
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().clone()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

impl TargetService for FakeService {
    async fn submit(
        &self,
        kind: CommandKind,
        certname: &str,
        body: &Document,
    ) -> Result<SubmissionResult, ClientError> {
        self.received.lock().push(Received {
            kind,
            certname: certname.to_string(),
            body: body.clone(),
            at: tokio::time::Instant::now(),
        });
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(SubmissionResult {
            status_code: self.status,
            body: if self.status == 200 {
                String::new()
            } else {
                "server error".to_string()
            },
        })
    }

    async fn fetch_metrics(
        &self,
        names: &BTreeMap<String, String>,
    ) -> Result<Map<String, Value>, ClientError> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        if self.failing_polls.contains(&poll) {
            return Err(ClientError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(names
            .keys()
            .map(|key| (key.clone(), json!({"Count": poll})))
            .collect())
    }
}
