//! HTTP client for the local collector.
//!
//! # Example
//!
//! ```rust,no_run
//! use vibelog_cli::client::CollectorClient;
//!
//! # async fn example() -> Result<(), vibelog_cli::CliError> {
//! let client = CollectorClient::new("http://127.0.0.1:51234")?;
//! if client.health().await {
//!     client.ingest("demo", "{\"ts\":1,\"message\":\"hi\"}\n".to_string()).await.ok();
//! }
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{CliError, ShipError};
use crate::leader::HealthProbe;
use crate::shipper::IngestSink;

/// Default collector URL.
pub const DEFAULT_COLLECTOR_URL: &str = "http://127.0.0.1:51234";

/// Default timeout of a health probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default timeout of an ingest or RPC request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the collector's HTTP interface.
#[derive(Debug, Clone)]
pub struct CollectorClient {
    http: reqwest::Client,
    base_url: String,
    probe_timeout: Duration,
}

impl CollectorClient {
    /// Create a client for the collector at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not `http://` or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str) -> Result<Self, CliError> {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(CliError::Config(format!(
                "invalid collector URL: {base_url}, must start with http://"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CliError::Config(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        })
    }

    /// Set the health probe timeout.
    #[must_use]
    pub const fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// The collector base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Returns true if `GET /health` answers with a success status in time.
    pub async fn health(&self) -> bool {
        let result = self
            .http
            .get(self.url("/health"))
            .timeout(self.probe_timeout)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                trace!(error = %e, "Health probe failed");
                false
            }
        }
    }

    /// Posts an NDJSON batch to `/ingest/{name}`.
    ///
    /// # Errors
    ///
    /// Returns [`ShipError::Delivery`] if the request fails and
    /// [`ShipError::Status`] for a non-success response.
    pub async fn ingest(&self, name: &str, body: String) -> Result<(), ShipError> {
        let response = self
            .http
            .post(self.url(&format!("/ingest/{name}")))
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| ShipError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ShipError::Status(status.as_u16()));
        }
        debug!(stream = %name, "Batch delivered");
        Ok(())
    }

    /// Posts a raw JSON-RPC request to `/mcp` and returns the response body.
    ///
    /// The body is empty for notifications.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Collector`] if the request fails.
    pub async fn rpc(&self, request: String) -> Result<String, CliError> {
        let response = self
            .http
            .post(self.url("/mcp"))
            .header("content-type", "application/json")
            .body(request)
            .send()
            .await
            .map_err(|e| CliError::Collector(e.to_string()))?;

        response
            .text()
            .await
            .map_err(|e| CliError::Collector(e.to_string()))
    }
}

impl HealthProbe for CollectorClient {
    fn is_healthy(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(self.health())
    }
}

impl IngestSink for CollectorClient {
    fn ingest<'a>(
        &'a self,
        name: &'a str,
        body: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), ShipError>> + Send + 'a>> {
        Box::pin(CollectorClient::ingest(self, name, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{start_collector, unused_url};

    #[test]
    fn rejects_non_http_url() {
        let result = CollectorClient::new("ws://localhost:51234");
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn trims_trailing_slash() {
        let client = CollectorClient::new("http://localhost:51234/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:51234");
    }

    #[tokio::test]
    async fn health_against_running_collector() {
        let collector = start_collector().await;
        let client = CollectorClient::new(&collector.url).unwrap();
        assert!(client.health().await);
    }

    #[tokio::test]
    async fn health_without_collector_is_false() {
        let client = CollectorClient::new(&unused_url())
            .unwrap()
            .with_probe_timeout(Duration::from_millis(200));
        assert!(!client.health().await);

        let result = client.ingest("demo", "x\n".to_string()).await;
        assert!(matches!(result, Err(ShipError::Delivery(_))));
    }

    #[tokio::test]
    async fn ingest_and_rpc_round_trip() {
        let collector = start_collector().await;
        let client = CollectorClient::new(&collector.url).unwrap();

        client
            .ingest("demo", "{\"ts\":1,\"message\":\"hi\"}\n".to_string())
            .await
            .unwrap();
        assert!(collector.server.state().store().contains("demo"));

        let response = client
            .rpc(r#"{"jsonrpc":"2.0","id":1,"method":"resources/list"}"#.to_string())
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(json["result"]["resources"][0]["id"], "demo");

        let response = client
            .rpc(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_string())
            .await
            .unwrap();
        assert!(response.is_empty());
    }
}
