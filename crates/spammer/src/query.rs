//! Query replay.
//!
//! Named sets of read queries, loaded from TOML, that can be fired at the
//! query API alongside (or instead of) command submission:
//!
//! ```toml
//! [[sets.nodes]]
//! path = "/pdb/query/v4/nodes"
//! method = "GET"
//! query = ["=", "certname", "host-1"]
//! limit = 10
//!
//! [[sets.nodes]]
//! path = "/pdb/query/v4/facts"
//! method = "POST"
//! query = ["=", "name", "kernel"]
//! headers = { "Content-Type" = "application/json" }
//! ```

use crate::client::{HttpMethod, IngestClient};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One query to replay.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct QuerySpec {
    /// Endpoint path, relative to the service base URL.
    pub path: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// Query expression, sent JSON-encoded.
    pub query: Value,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    /// Ordering clause, sent JSON-encoded.
    #[serde(default)]
    pub order_by: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl QuerySpec {
    /// URL parameters for a GET request.
    pub fn url_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("query", self.query.to_string())];
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(offset) = self.offset {
            params.push(("offset", offset.to_string()));
        }
        if let Some(order_by) = &self.order_by {
            params.push(("order_by", order_by.to_string()));
        }
        params
    }

    /// JSON body for a POST request.
    pub fn post_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".to_string(), self.query.clone());
        if let Some(limit) = self.limit {
            body.insert("limit".to_string(), Value::from(limit));
        }
        if let Some(offset) = self.offset {
            body.insert("offset".to_string(), Value::from(offset));
        }
        if let Some(order_by) = &self.order_by {
            body.insert("order_by".to_string(), order_by.clone());
        }
        Value::Object(body)
    }
}

/// Named query sets.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct QuerySets {
    #[serde(default)]
    pub sets: BTreeMap<String, Vec<QuerySpec>>,
}

impl QuerySets {
    /// Parse query sets from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, QueryConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load query sets from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, QueryConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| QueryConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Queries in the named set.
    pub fn get(&self, name: &str) -> Result<&[QuerySpec], QueryConfigError> {
        self.sets
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| QueryConfigError::UnknownSet(name.to_string()))
    }

    /// Names of all sets.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }
}

/// Outcome of replaying a query set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub succeeded: u64,
    pub failed: u64,
}

/// Issue each query once, in order. Failures are logged, never fatal.
pub async fn replay(client: &IngestClient, specs: &[QuerySpec]) -> ReplayReport {
    let mut report = ReplayReport::default();

    for spec in specs {
        match client.request(spec).await {
            Ok(result) if result.is_success() => report.succeeded += 1,
            Ok(result) => {
                report.failed += 1;
                warn!(
                    method = spec.method.as_str(),
                    path = %spec.path,
                    query = %spec.query,
                    status = result.status_code,
                    body = %result.body,
                    "Query failed"
                );
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    method = spec.method.as_str(),
                    path = %spec.path,
                    query = %spec.query,
                    error = %e,
                    "Query transport error"
                );
            }
        }
    }

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        "Replayed query set"
    );
    report
}

/// Errors loading query sets.
#[derive(Debug, thiserror::Error)]
pub enum QueryConfigError {
    #[error("Failed to read query config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse query config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown query set: {0}")]
    UnknownSet(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SETS: &str = r#"
        [[sets.basic]]
        path = "/pdb/query/v4/nodes"
        query = ["=", "certname", "host-1"]
        limit = 10
        offset = 5

        [[sets.basic]]
        path = "/pdb/query/v4/facts"
        method = "POST"
        query = ["=", "name", "kernel"]
        limit = 3
        headers = { "X-Trace" = "replay" }
    "#;

    fn client_for(server: &MockServer) -> IngestClient {
        let config = ClientConfig {
            base_url: format!("{}/", server.uri()),
            timeout: Duration::from_secs(5),
        };
        IngestClient::new(&config).unwrap()
    }

    #[test]
    fn test_parse_query_sets() {
        let sets = QuerySets::from_toml_str(SETS).unwrap();
        let basic = sets.get("basic").unwrap();
        assert_eq!(basic.len(), 2);
        assert_eq!(basic[0].method, HttpMethod::Get);
        assert_eq!(basic[0].query, json!(["=", "certname", "host-1"]));
        assert_eq!(basic[1].method, HttpMethod::Post);
        assert_eq!(basic[1].headers["X-Trace"], "replay");
        assert_eq!(sets.names().collect::<Vec<_>>(), vec!["basic"]);
    }

    #[test]
    fn test_unknown_set() {
        let sets = QuerySets::from_toml_str(SETS).unwrap();
        assert!(matches!(
            sets.get("missing"),
            Err(QueryConfigError::UnknownSet(_))
        ));
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            QuerySets::from_toml_str("[[sets.x]]\npath = 3"),
            Err(QueryConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_url_params() {
        let sets = QuerySets::from_toml_str(SETS).unwrap();
        let params = sets.get("basic").unwrap()[0].url_params();
        assert_eq!(
            params,
            vec![
                ("query", r#"["=","certname","host-1"]"#.to_string()),
                ("limit", "10".to_string()),
                ("offset", "5".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_replay_counts_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pdb/query/v4/nodes"))
            .and(query_param("limit", "10"))
            .and(query_param("offset", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/pdb/query/v4/facts"))
            .and(header("x-trace", "replay"))
            .and(body_json(json!({"query": ["=", "name", "kernel"], "limit": 3})))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad query"))
            .expect(1)
            .mount(&server)
            .await;

        let sets = QuerySets::from_toml_str(SETS).unwrap();
        let report = replay(&client_for(&server), sets.get("basic").unwrap()).await;
        assert_eq!(
            report,
            ReplayReport {
                succeeded: 1,
                failed: 1
            }
        );
    }
}
