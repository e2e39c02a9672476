//! Types for target service communication.

use std::time::Duration;

/// Result of one HTTP exchange with the target service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionResult {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, as text.
    pub body: String,
}

impl SubmissionResult {
    /// Check if the submission was successful.
    pub fn is_success(&self) -> bool {
        self.status_code >= 200 && self.status_code < 300
    }
}

/// HTTP method of a replayed query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    /// Method name as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// Client-side settings for talking to the target service.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL, e.g. `http://localhost:8080/`.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Configuration for a service at `host:port` over plain HTTP.
    pub fn from_host_port(host: &str, port: u16) -> Self {
        Self {
            base_url: format!("http://{host}:{port}/"),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        let ok = |status_code| SubmissionResult {
            status_code,
            body: String::new(),
        };
        assert!(ok(200).is_success());
        assert!(ok(204).is_success());
        assert!(!ok(500).is_success());
        assert!(!ok(302).is_success());
    }

    #[test]
    fn test_base_url() {
        let config = ClientConfig::from_host_port("pdb.example", 8081);
        assert_eq!(config.base_url, "http://pdb.example:8081/");
    }
}
