//! HTTP request handlers for the collector.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::ServerResult;
use crate::mcp::{self, GetLogArgs, McpRequest, RpcRequest, RpcResponse};
use crate::state::CollectorState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status message.
    pub status: String,
    /// Collector version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
}

/// Handle GET /health - liveness probe used by leader election.
pub async fn health_check(State(state): State<Arc<CollectorState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: mcp::SERVER_VERSION.to_string(),
        uptime_secs: state.uptime_secs(),
    })
}

/// Handle POST `/ingest/{name}` - append an NDJSON body to a stream.
pub async fn ingest(
    State(state): State<Arc<CollectorState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> ServerResult<StatusCode> {
    let text = String::from_utf8_lossy(&body);
    let outcome = state.ingest(&name, &text).inspect_err(|e| {
        warn!(stream = %name, error = %e, "Ingest failed");
    })?;
    debug!(stream = %name, lines = outcome.lines(), "Ingested batch");
    Ok(StatusCode::NO_CONTENT)
}

/// Handle GET /mcp/manifest.json - static tool manifest.
pub async fn get_manifest() -> Json<Value> {
    Json(mcp::manifest())
}

/// Handle POST /mcp - JSON-RPC endpoint.
///
/// Protocol errors are returned as JSON-RPC error responses with status 200.
/// Client notifications are acknowledged with 202 and no body.
pub async fn mcp_rpc(State(state): State<Arc<CollectorState>>, body: Bytes) -> Response {
    let request = match RpcRequest::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Rejected JSON-RPC body");
            return Json(RpcResponse::failure(Value::Null, &e)).into_response();
        }
    };
    let id = request.id.clone().unwrap_or(Value::Null);

    let parsed = match McpRequest::parse(&request.method, request.params) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(method = %request.method, error = %e, "Rejected JSON-RPC request");
            return Json(RpcResponse::failure(id, &e)).into_response();
        }
    };

    if parsed.is_notification() {
        return StatusCode::ACCEPTED.into_response();
    }

    match mcp::dispatch(&state, parsed).await {
        Ok(result) => Json(RpcResponse::success(id, result)).into_response(),
        Err(e) => {
            debug!(method = %request.method, error = %e, "JSON-RPC method failed");
            Json(RpcResponse::failure(id, &e)).into_response()
        }
    }
}

/// Handle POST /mcp/resources/list - legacy resource listing.
pub async fn legacy_list_resources(State(state): State<Arc<CollectorState>>) -> Json<Value> {
    Json(json!({ "resources": mcp::list_resources(&state) }))
}

/// Handle POST /mcp/tools/get_log - legacy tool call.
///
/// Answers `{"content": "<text>"}`, not the MCP content array.
pub async fn legacy_get_log(
    State(state): State<Arc<CollectorState>>,
    Json(args): Json<GetLogArgs>,
) -> ServerResult<Json<Value>> {
    let text = mcp::get_log(&state, &args).await?;
    Ok(Json(json!({ "content": text })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorConfig;
    use tempfile::TempDir;
    use vibelog_logs::OutputFormat;

    fn make_test_state() -> (Arc<CollectorState>, TempDir) {
        let dir = TempDir::new().unwrap();
        let state = CollectorState::new(CollectorConfig::new(dir.path())).unwrap();
        (Arc::new(state), dir)
    }

    #[tokio::test]
    async fn test_health_check() {
        let (state, _dir) = make_test_state();
        let response = health_check(State(state)).await;

        assert_eq!(response.status, "ok");
        assert_eq!(response.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_ingest_returns_no_content() {
        let (state, _dir) = make_test_state();
        let body = Bytes::from_static(b"{\"ts\":1,\"message\":\"hi\"}\n");

        let status = ingest(State(state.clone()), Path("Demo".to_string()), body)
            .await
            .unwrap();

        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(state.store().get("demo").map(|i| i.line_count), Some(1));
    }

    #[tokio::test]
    async fn test_legacy_get_log_not_found() {
        let (state, _dir) = make_test_state();
        let args = GetLogArgs {
            id: "missing".to_string(),
            fmt: OutputFormat::Text,
            tail: None,
            head: None,
            since: None,
        };

        let result = legacy_get_log(State(state), Json(args)).await;
        assert!(matches!(result, Err(crate::error::ServerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_legacy_get_log_returns_plain_content() {
        let (state, _dir) = make_test_state();
        let _ = state.ingest("demo", "{\"ts\":1,\"message\":\"hi\"}").unwrap();
        let args = GetLogArgs {
            id: "demo".to_string(),
            fmt: OutputFormat::Text,
            tail: None,
            head: None,
            since: None,
        };

        let Json(value) = legacy_get_log(State(state), Json(args)).await.unwrap();
        assert_eq!(value, json!({ "content": "[log] hi" }));
    }

    #[tokio::test]
    async fn test_legacy_list_resources_empty() {
        let (state, _dir) = make_test_state();
        let Json(value) = legacy_list_resources(State(state)).await;
        assert_eq!(value, json!({ "resources": [] }));
    }
}
