//! # vibelog-server
//!
//! The local log collector: a single long-lived process that owns the log
//! directory, appends ingested records, sweeps stale streams and serves
//! stream contents to MCP clients.
//!
//! ## Example
//!
//! ```rust,no_run
//! use vibelog_server::{CollectorConfig, CollectorServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = CollectorServer::new(CollectorConfig::new("/tmp/vibelog-logs"))?;
//!     server
//!         .serve_with_shutdown(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## API Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/health` | GET | Liveness probe with version |
//! | `/ingest/{name}` | POST | Append an NDJSON batch to a stream |
//! | `/mcp` | POST | MCP JSON-RPC 2.0 |
//! | `/mcp/manifest.json` | GET | Static tool manifest |
//! | `/mcp/notifications` | GET | WebSocket push of change notifications |
//! | `/mcp/resources/list` | POST | Legacy resource listing |
//! | `/mcp/tools/get_log` | POST | Legacy tool call |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod mcp;
pub mod notifications;
pub mod routes;
pub mod server;
pub mod state;
pub mod websocket;

// Re-export main types
pub use config::{CollectorConfig, DEFAULT_BODY_LIMIT, DEFAULT_PORT};
pub use error::{ServerError, ServerResult};
pub use mcp::{McpRequest, RpcError, RpcRequest, RpcResponse, SERVER_VERSION};
pub use notifications::{Broadcaster, Notification, Subscription};
pub use routes::create_router;
pub use server::{CollectorServer, run_purge, spawn_purge_task};
pub use state::CollectorState;
