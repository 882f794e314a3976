//! MCP JSON-RPC protocol: request parsing, dispatch and response shapes.
//!
//! The method set is closed. A request body is parsed into an [`McpRequest`]
//! and executed with an exhaustive match; every failure is a typed
//! [`RpcError`] carrying its JSON-RPC error code.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use vibelog_logs::{OutputFormat, QueryError, QueryOptions, StreamSummary, sanitize_name};

use crate::state::CollectorState;

/// Protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name reported to MCP clients.
pub const SERVER_NAME: &str = "vibelogger";

/// Collector version reported by `/health`, `initialize` and the manifest.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the single query tool.
pub const GET_LOG_TOOL: &str = "get_log";

/// JSON-RPC error codes.
pub mod codes {
    /// Body is not valid JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// Body is JSON but not a request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Parameters do not match the method.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Any failure while executing a method.
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Protocol-level failures.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The body could not be parsed as JSON.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The body is not a JSON-RPC request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Parameters are missing or malformed.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The method is not part of the protocol.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// `tools/call` named a tool that does not exist.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The requested stream does not exist.
    #[error("Log not found")]
    LogNotFound,

    /// Executing the method failed.
    #[error("{0}")]
    Internal(String),
}

impl RpcError {
    /// JSON-RPC error code for this error.
    #[must_use]
    pub const fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => codes::PARSE_ERROR,
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
            Self::InvalidParams(_) => codes::INVALID_PARAMS,
            Self::UnknownMethod(_) | Self::UnknownTool(_) | Self::LogNotFound | Self::Internal(_) => {
                codes::INTERNAL_ERROR
            }
        }
    }
}

impl From<QueryError> for RpcError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::NotFound(_) => Self::LogNotFound,
            QueryError::InvalidSince(_) => Self::InvalidParams(err.to_string()),
            QueryError::Io(e) => Self::Internal(e.to_string()),
        }
    }
}

/// Raw JSON-RPC request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    /// Protocol marker, expected to be `"2.0"`.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Request id; absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// Parses a request body.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Parse`] for invalid JSON and
    /// [`RpcError::InvalidRequest`] for JSON that is not a request object.
    pub fn from_slice(body: &[u8]) -> Result<Self, RpcError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| RpcError::Parse(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| RpcError::InvalidRequest(e.to_string()))
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcErrorBody {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// JSON-RPC response envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcErrorBody>,
}

impl RpcResponse {
    /// A successful response.
    #[must_use]
    pub const fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error response.
    #[must_use]
    pub fn failure(id: Value, error: &RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcErrorBody {
                code: error.code(),
                message: error.to_string(),
            }),
        }
    }

    /// The result payload, if successful.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// The error payload, if failed.
    #[must_use]
    pub const fn error(&self) -> Option<&RpcErrorBody> {
        self.error.as_ref()
    }
}

/// Arguments of the `get_log` tool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GetLogArgs {
    /// Stream name; sanitized before lookup.
    pub id: String,
    /// Output format.
    #[serde(default)]
    pub fmt: OutputFormat,
    /// Keep only the last N lines.
    #[serde(default)]
    pub tail: Option<usize>,
    /// Keep only the first N lines.
    #[serde(default)]
    pub head: Option<usize>,
    /// Drop records before this ISO-8601 timestamp.
    #[serde(default)]
    pub since: Option<String>,
}

impl GetLogArgs {
    /// Query filters carried by these arguments.
    #[must_use]
    pub fn options(&self) -> QueryOptions {
        QueryOptions {
            tail: self.tail,
            head: self.head,
            since: self.since.clone(),
        }
    }
}

/// A parsed protocol request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpRequest {
    /// Capability handshake.
    Initialize,
    /// Client acknowledgement of the handshake.
    Initialized,
    /// List streams as resources.
    ResourcesList,
    /// List available tools.
    ToolsList,
    /// Call the `get_log` tool.
    GetLog(GetLogArgs),
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl McpRequest {
    /// Parses a method name and its parameters.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::UnknownMethod`], [`RpcError::UnknownTool`] or
    /// [`RpcError::InvalidParams`].
    pub fn parse(method: &str, params: Value) -> Result<Self, RpcError> {
        match method {
            "initialize" => Ok(Self::Initialize),
            "notifications/initialized" => Ok(Self::Initialized),
            "resources/list" => Ok(Self::ResourcesList),
            "tools/list" => Ok(Self::ToolsList),
            "tools/call" => {
                let call: ToolCallParams = serde_json::from_value(params)
                    .map_err(|e| RpcError::InvalidParams(e.to_string()))?;
                if call.name != GET_LOG_TOOL {
                    return Err(RpcError::UnknownTool(call.name));
                }
                let args = serde_json::from_value(call.arguments)
                    .map_err(|e| RpcError::InvalidParams(e.to_string()))?;
                Ok(Self::GetLog(args))
            }
            other => Err(RpcError::UnknownMethod(other.to_string())),
        }
    }

    /// Returns true for client notifications, which get no response body.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        matches!(self, Self::Initialized)
    }
}

/// Resource listing entry for one stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogResource {
    /// Stream name.
    pub id: String,
    /// `log://<name>`.
    pub uri: String,
    /// Display name.
    pub name: String,
    /// Always `text/plain`.
    pub mime_type: &'static str,
    /// Stream metadata.
    pub props: LogResourceProps,
}

/// Metadata attached to a [`LogResource`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogResourceProps {
    /// Creation time.
    pub started: String,
    /// Last activity time.
    pub last_ts: String,
    /// Indexed line count.
    pub line_count: u64,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Seconds since last activity.
    pub secs_since_activity: u64,
}

impl From<StreamSummary> for LogResource {
    fn from(summary: StreamSummary) -> Self {
        let info = summary.info;
        Self {
            uri: info.uri(),
            id: info.name.clone(),
            name: info.name,
            mime_type: "text/plain",
            props: LogResourceProps {
                started: info.started.to_rfc3339(),
                last_ts: info.last_activity.to_rfc3339(),
                line_count: info.line_count,
                size_bytes: info.size_bytes,
                secs_since_activity: summary.secs_since_activity,
            },
        }
    }
}

/// JSON schema of the `get_log` tool.
#[must_use]
pub fn get_log_tool() -> Value {
    json!({
        "name": GET_LOG_TOOL,
        "description": "Retrieve log content by ID with optional filtering",
        "inputSchema": {
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Log ID" },
                "fmt": {
                    "type": "string",
                    "enum": ["text", "json"],
                    "default": "text",
                    "description": "Output format"
                },
                "tail": { "type": "number", "description": "Number of lines from end" },
                "head": { "type": "number", "description": "Number of lines from start" },
                "since": { "type": "string", "description": "ISO timestamp to filter from" }
            },
            "required": ["id"]
        }
    })
}

/// Static tool manifest served at `/mcp/manifest.json`.
#[must_use]
pub fn manifest() -> Value {
    json!({
        "name": SERVER_NAME,
        "version": SERVER_VERSION,
        "description": "Local logging server with MCP protocol support",
        "tools": [get_log_tool()],
    })
}

/// Result of the `initialize` handshake.
#[must_use]
pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "resources": { "list": true, "read": true, "subscribe": false, "listChanged": true },
            "tools": { "list": true }
        },
        "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION }
    })
}

/// All streams as resources, sorted by name.
#[must_use]
pub fn list_resources(state: &CollectorState) -> Vec<LogResource> {
    state
        .store()
        .list_streams()
        .into_iter()
        .map(LogResource::from)
        .collect()
}

/// Runs the `get_log` tool and returns its text.
///
/// # Errors
///
/// Returns [`QueryError`] if the stream is unknown, `since` is invalid or the
/// read fails.
pub async fn get_log(state: &CollectorState, args: &GetLogArgs) -> Result<String, QueryError> {
    let name = sanitize_name(&args.id);
    state
        .query()
        .read_formatted(&name, &args.options(), args.fmt)
        .await
}

/// Wraps tool output in the MCP content envelope.
#[must_use]
pub fn text_content(text: String) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}

/// Executes a parsed request.
///
/// # Errors
///
/// Returns the [`RpcError`] to report to the client.
pub async fn dispatch(state: &CollectorState, request: McpRequest) -> Result<Value, RpcError> {
    match request {
        McpRequest::Initialize => Ok(initialize_result()),
        McpRequest::Initialized => Ok(Value::Null),
        McpRequest::ResourcesList => Ok(json!({ "resources": list_resources(state) })),
        McpRequest::ToolsList => Ok(json!({ "tools": [get_log_tool()] })),
        McpRequest::GetLog(args) => Ok(text_content(get_log(state, &args).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorConfig;
    use tempfile::TempDir;
    use test_case::test_case;

    fn make_test_state() -> (CollectorState, TempDir) {
        let dir = TempDir::new().unwrap();
        let state = CollectorState::new(CollectorConfig::new(dir.path())).unwrap();
        (state, dir)
    }

    #[test_case("initialize", McpRequest::Initialize ; "initialize")]
    #[test_case("notifications/initialized", McpRequest::Initialized ; "initialized")]
    #[test_case("resources/list", McpRequest::ResourcesList ; "resources list")]
    #[test_case("tools/list", McpRequest::ToolsList ; "tools list")]
    fn test_parse_simple_methods(method: &str, expected: McpRequest) {
        assert_eq!(McpRequest::parse(method, Value::Null).unwrap(), expected);
    }

    #[test]
    fn test_parse_tool_call() {
        let params = json!({ "name": "get_log", "arguments": { "id": "demo", "fmt": "json", "tail": 5 } });
        let request = McpRequest::parse("tools/call", params).unwrap();

        let McpRequest::GetLog(args) = request else {
            panic!("expected get_log");
        };
        assert_eq!(args.id, "demo");
        assert_eq!(args.fmt, OutputFormat::Json);
        assert_eq!(args.tail, Some(5));
        assert_eq!(args.head, None);
    }

    #[test]
    fn test_parse_errors() {
        let err = McpRequest::parse("resources/read", Value::Null).unwrap_err();
        assert_eq!(err.to_string(), "Unknown method: resources/read");
        assert_eq!(err.code(), -32603);

        let err = McpRequest::parse("tools/call", json!({ "name": "rm_log" })).unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: rm_log");
        assert_eq!(err.code(), -32603);

        let err = McpRequest::parse("tools/call", json!({ "name": "get_log", "arguments": {} }))
            .unwrap_err();
        assert_eq!(err.code(), -32602);

        let err = McpRequest::parse("tools/call", json!("nope")).unwrap_err();
        assert_eq!(err.code(), -32602);
    }

    #[test]
    fn test_request_from_slice() {
        let request = RpcRequest::from_slice(br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
            .unwrap();
        assert_eq!(request.method, "tools/list");
        assert_eq!(request.id, Some(json!(1)));

        assert_eq!(RpcRequest::from_slice(b"{nope").unwrap_err().code(), -32700);
        assert_eq!(RpcRequest::from_slice(b"42").unwrap_err().code(), -32600);
    }

    #[test]
    fn test_response_serialization() {
        let ok = serde_json::to_value(RpcResponse::success(json!(7), json!({}))).unwrap();
        assert_eq!(ok, json!({ "jsonrpc": "2.0", "id": 7, "result": {} }));

        let failed = RpcResponse::failure(json!(8), &RpcError::LogNotFound);
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["error"]["code"], -32603);
        assert_eq!(value["error"]["message"], "Log not found");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_initialize_and_manifest() {
        let init = initialize_result();
        assert_eq!(init["protocolVersion"], "2024-11-05");
        assert_eq!(init["capabilities"]["resources"]["listChanged"], true);
        assert_eq!(init["serverInfo"]["name"], "vibelogger");

        let manifest = manifest();
        assert_eq!(manifest["tools"][0]["name"], "get_log");
        assert_eq!(manifest["tools"][0]["inputSchema"]["required"], json!(["id"]));
    }

    #[tokio::test]
    async fn test_dispatch_resources_and_get_log() {
        let (state, _dir) = make_test_state();
        let _ = state
            .ingest("demo", "{\"ts\":1000,\"stream\":\"stdout\",\"data\":\"aGVsbG8=\"}")
            .unwrap();

        let listed = dispatch(&state, McpRequest::ResourcesList).await.unwrap();
        let resource = &listed["resources"][0];
        assert_eq!(resource["id"], "demo");
        assert_eq!(resource["uri"], "log://demo");
        assert_eq!(resource["mimeType"], "text/plain");
        assert_eq!(resource["props"]["line_count"], 1);

        let args = GetLogArgs {
            id: "DEMO".to_string(),
            fmt: OutputFormat::Text,
            tail: None,
            head: None,
            since: None,
        };
        let result = dispatch(&state, McpRequest::GetLog(args)).await.unwrap();
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "hello");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_stream() {
        let (state, _dir) = make_test_state();
        let args = GetLogArgs {
            id: "missing".to_string(),
            fmt: OutputFormat::Text,
            tail: None,
            head: None,
            since: None,
        };
        let err = dispatch(&state, McpRequest::GetLog(args)).await.unwrap_err();
        assert!(matches!(err, RpcError::LogNotFound));
    }
}
