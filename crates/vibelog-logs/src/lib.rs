//! # vibelog-logs
//!
//! Append-only stream storage for captured terminal and console output.
//!
//! This crate provides:
//!
//! - [`Record`] - One captured event, stored one-per-line as NDJSON
//! - [`LogStore`] - Per-stream files plus an in-memory index
//! - [`RetentionPurger`] - Time-based deletion of stale streams
//! - [`QueryEngine`] - `tail` / `head` / `since` reads with rendering
//! - [`paths`] - Log directory layout
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vibelog_logs::{LogStore, OutputFormat, QueryEngine, QueryOptions, Record, now_millis};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(LogStore::open("/tmp/vibelog-demo")?);
//! let line = Record::exit(now_millis(), 0).to_line()?;
//! store.append("demo", &line)?;
//!
//! let engine = QueryEngine::new(store);
//! let text = engine
//!     .read_formatted("demo", &QueryOptions::new().with_tail(10), OutputFormat::Text)
//!     .await?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod paths;
pub mod query;
pub mod record;
pub mod retention;
pub mod store;

// Re-export main types
pub use error::{LogError, QueryError, Result};
pub use query::{OutputFormat, QueryEngine, QueryOptions, strip_ansi};
pub use record::{
    MessageLevel, Origin, Payload, Record, STREAM_URI_SCHEME, is_sanitized, now_millis,
    sanitize_name, stream_uri,
};
pub use retention::{DEFAULT_RETENTION, PurgeReport, RetentionPolicy, RetentionPurger};
pub use store::{AppendOutcome, LogStore, StreamInfo, StreamSummary};
