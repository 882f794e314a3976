//! # vibelog-cli
//!
//! The `vibelog` command-line tool.
//!
//! Provides:
//! - Capture sessions: run a command under a pseudo-terminal and ship its
//!   output to the local collector
//! - Collector leadership: the first capture session to find no collector
//!   starts one, coordinated through a lock file
//! - `serve`: the collector in the foreground
//! - `mcp-stdio`: an MCP bridge for assistants that only speak stdio
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  NDJSON batches   ┌────────────────┐  MCP (HTTP/ws)  ┌───────────┐
//! │ vibelog run  │──────────────────►│   collector    │◄───────────────►│ assistant │
//! │ (pty capture)│  POST /ingest/..  │ (vibelog serve)│                 └───────────┘
//! └──────────────┘                   └────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod capture;
pub mod cli;
pub mod client;
pub mod commands;
pub mod error;
pub mod leader;
pub mod shipper;
pub mod signal;

#[cfg(test)]
mod test_support;

pub use capture::{CaptureAgent, CaptureConfig};
pub use cli::{CaptureArgs, Cli, Commands, ServeArgs};
pub use client::CollectorClient;
pub use error::{CaptureError, CliError, ShipError};
pub use leader::{LeaderLock, LeaderState, LeaderSupervisor, LockOutcome, SupervisorConfig};
pub use shipper::{BatchShipper, RetryBuffer, ShipperConfig};
