//! Filtered reads over stream files.
//!
//! This module provides:
//! - [`QueryEngine`] - Streams a stream file, decodes records and applies filters
//! - [`QueryOptions`] - `tail` / `head` / `since` filters
//! - [`OutputFormat`] - Joins rendered lines and strips terminal escapes

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::error::QueryError;
use crate::record::Record;
use crate::store::LogStore;

/// CSI (`ESC [ ... final`) and OSC (`ESC ] ... BEL|ST`) escape sequences.
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)")
        .unwrap_or_else(|_| unreachable!())
});

/// Removes ANSI escape sequences from `text`.
#[must_use]
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Filters for a stream read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Keep only the last N rendered lines. Wins over `head`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail: Option<usize>,
    /// Keep only the first N rendered lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<usize>,
    /// Drop records strictly earlier than this ISO-8601 timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
}

impl QueryOptions {
    /// Creates options with no filters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `tail`.
    #[must_use]
    pub const fn with_tail(mut self, n: usize) -> Self {
        self.tail = Some(n);
        self
    }

    /// Sets `head`.
    #[must_use]
    pub const fn with_head(mut self, n: usize) -> Self {
        self.head = Some(n);
        self
    }

    /// Sets `since`.
    #[must_use]
    pub fn with_since(mut self, since: impl Into<String>) -> Self {
        self.since = Some(since.into());
        self
    }

    fn window(&self) -> Window {
        match (self.tail.filter(|n| *n > 0), self.head.filter(|n| *n > 0)) {
            (Some(n), _) => Window::Tail(n),
            (None, Some(n)) => Window::Head(n),
            (None, None) => Window::All,
        }
    }

    fn since_millis(&self) -> Result<Option<i64>, QueryError> {
        self.since
            .as_deref()
            .map(|raw| parse_since(raw).ok_or_else(|| QueryError::InvalidSince(raw.to_string())))
            .transpose()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    All,
    Head(usize),
    Tail(usize),
}

/// Parses an ISO-8601 timestamp into epoch milliseconds.
///
/// Accepts RFC 3339, a naive date-time (taken as UTC) or a bare date.
fn parse_since(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).timestamp_millis())
}

/// How rendered lines are returned to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Escape sequences stripped.
    #[default]
    Text,
    /// Escape sequences kept.
    Json,
}

impl OutputFormat {
    /// Joins rendered lines with `\n`, stripping escapes for [`OutputFormat::Text`].
    ///
    /// Every record is one entry, so terminal output split across several
    /// pty reads shows a line break at each read boundary even mid-line.
    /// Records stay distinguishable that way; concatenating the raw bytes
    /// would merge captured output with interleaved messages and input.
    #[must_use]
    pub fn format(&self, lines: &[String]) -> String {
        let joined = lines.join("\n");
        match self {
            Self::Text => strip_ansi(&joined),
            Self::Json => joined,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format: {other}")),
        }
    }
}

/// Reads and filters streams held by a [`LogStore`].
#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: Arc<LogStore>,
}

impl QueryEngine {
    /// Creates an engine over `store`.
    #[must_use]
    pub const fn new(store: Arc<LogStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    /// Reads a stream and returns its rendered lines after filtering.
    ///
    /// The file is streamed line by line. `head` stops reading early; `tail`
    /// keeps at most N lines in memory. A read that reaches the end of the
    /// file corrects the stream's indexed line count.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NotFound`] for unknown streams,
    /// [`QueryError::InvalidSince`] for an unparseable `since` and
    /// [`QueryError::Io`] if reading fails.
    pub async fn read(&self, name: &str, options: &QueryOptions) -> Result<Vec<String>, QueryError> {
        if self.store.get(name).is_none() {
            return Err(QueryError::NotFound(name.to_string()));
        }
        let since = options.since_millis()?;
        let window = options.window();

        let file = match File::open(self.store.path_for(name)).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(QueryError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);

        let mut out: VecDeque<String> = VecDeque::new();
        let mut buf = Vec::new();
        let mut line_count = 0u64;
        let mut reached_eof = true;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            line_count += 1;

            let Some(record) = Record::from_line(line) else {
                continue;
            };
            if since.is_some_and(|since| record.ts < since) {
                continue;
            }

            out.push_back(record.render());
            match window {
                Window::Tail(n) if out.len() > n => {
                    out.pop_front();
                }
                Window::Head(n) if out.len() >= n => {
                    reached_eof = false;
                    break;
                }
                _ => {}
            }
        }

        if reached_eof {
            self.store.correct_line_count(name, line_count);
        }

        debug!(stream = %name, lines = out.len(), "Query complete");
        Ok(out.into())
    }

    /// Reads a stream and formats the result.
    ///
    /// # Errors
    ///
    /// See [`QueryEngine::read`].
    pub async fn read_formatted(
        &self,
        name: &str,
        options: &QueryOptions,
        format: OutputFormat,
    ) -> Result<String, QueryError> {
        let lines = self.read(name, options).await?;
        Ok(format.format(&lines))
    }
}
