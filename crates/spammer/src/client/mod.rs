//! HTTP client for the target ingestion service.
//!
//! The simulation core only needs two capabilities, captured by
//! [`TargetService`]: submitting a command and fetching metric values.
//! [`IngestClient`] implements them over the PuppetDB-style HTTP API and adds
//! the query endpoints used by the `query` and `replay` subcommands.

mod records;
mod types;

pub use records::{JsonArrayWriter, QueryRecords};
pub use types::{ClientConfig, HttpMethod, SubmissionResult};

use crate::query::QuerySpec;
use fleetload_types::{CommandKind, Document, PRODUCER_TIMESTAMP_KEY};
use futures::StreamExt;
use reqwest::Url;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

const COMMAND_PATH: &str = "/pdb/cmd/v1";
const QUERY_PATH: &str = "/pdb/query/v4";
const METRICS_PATH: &str = "/metrics/v1/mbeans";
const STATUS_PATH: &str = "/status/v1/services";

/// What the simulation needs from the service under test.
pub trait TargetService: Send + Sync + 'static {
    /// Submit one command for `certname`.
    ///
    /// Non-2xx responses are returned as results, not errors.
    fn submit(
        &self,
        kind: CommandKind,
        certname: &str,
        body: &Document,
    ) -> impl Future<Output = Result<SubmissionResult, ClientError>> + Send;

    /// Fetch the current value of each named metric.
    ///
    /// `names` maps the key to record under to the service's metric name.
    fn fetch_metrics(
        &self,
        names: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<Map<String, Value>, ClientError>> + Send;
}

/// Client for a PuppetDB-style command, query and metrics API.
#[derive(Clone, Debug)]
pub struct IngestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl IngestClient {
    /// Create a client from configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, base_url })
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::InvalidUrl(format!("{path}: {e}")))
    }

    /// Run a query against the query endpoint.
    ///
    /// Records are parsed from the response body as it arrives.
    pub async fn query(&self, filter: &Value) -> Result<QueryRecords, ClientError> {
        let response = self
            .http
            .get(self.url(QUERY_PATH)?)
            .query(&[("query", filter.to_string())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: response.text().await?,
            });
        }
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ClientError::from));
        Ok(QueryRecords::new(body))
    }

    /// Issue one replayed query.
    pub async fn request(&self, spec: &QuerySpec) -> Result<SubmissionResult, ClientError> {
        let url = self.url(&spec.path)?;
        let builder = match spec.method {
            HttpMethod::Get => self.http.get(url).query(&spec.url_params()),
            HttpMethod::Post => self.http.post(url).json(&spec.post_body()),
        };
        let builder = spec
            .headers
            .iter()
            .fold(builder, |b, (name, value)| b.header(name, value));

        let response = builder.send().await?;
        let status_code = response.status().as_u16();
        let body = response.text().await?;
        Ok(SubmissionResult { status_code, body })
    }

    /// Poll the status endpoint until it answers 2xx.
    pub async fn wait_for_ready(&self, timeout: Duration) -> Result<(), ClientError> {
        let start = Instant::now();
        let url = self.url(STATUS_PATH)?;

        loop {
            match self.http.get(url.clone()).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(waited = ?start.elapsed(), "Target service ready");
                    return Ok(());
                }
                Ok(response) => {
                    debug!(status = response.status().as_u16(), "Target service not ready")
                }
                Err(e) => debug!(error = %e, "Target service unreachable"),
            }

            if start.elapsed() >= timeout {
                return Err(ClientError::NotReady { waited: timeout });
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

impl TargetService for IngestClient {
    async fn submit(
        &self,
        kind: CommandKind,
        certname: &str,
        body: &Document,
    ) -> Result<SubmissionResult, ClientError> {
        let mut body = body.clone();
        body.insert(
            PRODUCER_TIMESTAMP_KEY.to_string(),
            Value::String(humantime::format_rfc3339_millis(SystemTime::now()).to_string()),
        );

        let response = self
            .http
            .post(self.url(COMMAND_PATH)?)
            .query(&[
                ("certname", certname.to_string()),
                ("command", kind.command_name().to_string()),
                ("version", kind.version().to_string()),
            ])
            .json(&body)
            .send()
            .await?;

        let status_code = response.status().as_u16();
        let body = response.text().await?;
        Ok(SubmissionResult { status_code, body })
    }

    async fn fetch_metrics(
        &self,
        names: &BTreeMap<String, String>,
    ) -> Result<Map<String, Value>, ClientError> {
        let response = self
            .http
            .post(self.url(METRICS_PATH)?)
            .json(names)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: response.text().await?,
            });
        }

        match response.json::<Value>().await {
            Ok(Value::Object(values)) => Ok(values),
            Ok(other) => Err(ClientError::Decode(format!(
                "expected a JSON object of metrics, got {other}"
            ))),
            Err(e) => Err(ClientError::Decode(e.to_string())),
        }
    }
}

/// Errors talking to the target service.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid URL {0}")]
    InvalidUrl(String),

    #[error("Target service not ready after {waited:?}")]
    NotReady { waited: Duration },
}
