//! CLI command implementations.
//!
//! - [`run`] - Capture a command's terminal session
//! - [`serve`] - Foreground collector
//! - [`mcp_stdio`] - MCP stdio bridge

pub mod mcp_stdio;
pub mod run;
pub mod serve;

pub use mcp_stdio::McpStdioCommand;
pub use run::RunCommand;
pub use serve::ServeCommand;
