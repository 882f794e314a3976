//! MCP stdio bridge.
//!
//! Assistants that only speak MCP over stdio launch `vibelog mcp-stdio`.
//! Each stdin line is one JSON-RPC message; it is relayed to the collector's
//! `/mcp` endpoint and the response is written back as one stdout line.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};
use vibelog_server::{RpcError, RpcRequest, RpcResponse};

use crate::client::CollectorClient;
use crate::error::CliError;

/// MCP stdio bridge executor.
#[derive(Debug, Clone)]
pub struct McpStdioCommand {
    collector_url: String,
}

impl McpStdioCommand {
    /// Create a bridge to the collector at `collector_url`.
    #[must_use]
    pub fn new(collector_url: impl Into<String>) -> Self {
        Self {
            collector_url: collector_url.into(),
        }
    }

    /// Bridge process stdin/stdout until stdin closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or stdio fails.
    pub async fn execute(&self) -> Result<(), CliError> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        self.bridge(stdin, &mut stdout).await
    }

    /// Bridge `input` lines to the collector, writing responses to `output`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or reading/writing fails.
    pub async fn bridge<R, W>(&self, input: R, output: &mut W) -> Result<(), CliError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let client = CollectorClient::new(&self.collector_url)?;
        let mut lines = input.lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let reply = match client.rpc(line.to_string()).await {
                Ok(body) if body.is_empty() => None,
                Ok(body) => Some(body),
                Err(e) => {
                    warn!(error = %e, "Collector unreachable");
                    unreachable_reply(line, &e)
                }
            };

            if let Some(reply) = reply {
                output.write_all(reply.trim_end().as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
        }
        debug!("stdin closed, bridge exiting");
        Ok(())
    }
}

/// Error reply for a request the collector never saw. Notifications get none.
fn unreachable_reply(line: &str, error: &CliError) -> Option<String> {
    let id = match RpcRequest::from_slice(line.as_bytes()) {
        Ok(request) => request.id?,
        Err(_) => serde_json::Value::Null,
    };
    let response = RpcResponse::failure(id, &RpcError::Internal(error.to_string()));
    serde_json::to_string(&response).ok()
}
