//! The record model shared by capture clients and the collector.
//!
//! This module provides:
//! - [`Record`] - One captured event, serialized one-per-line as NDJSON
//! - [`Payload`] - The single payload kind a record carries
//! - [`Origin`] / [`MessageLevel`] - Payload enumerations
//! - [`sanitize_name`] / [`stream_uri`] - Stream naming helpers
//!
//! On the wire a record is a flat JSON object:
//!
//! ```text
//! {"ts":1000,"stream":"stdout","data":"aGVsbG8="}
//! {"ts":2000,"event":"exit","code":0}
//! {"ts":3000,"level":"warn","message":"deprecated","url":"https://x.test/a.js"}
//! ```

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// URI scheme under which streams are addressed externally.
pub const STREAM_URI_SCHEME: &str = "log://";

/// Which side of the terminal a chunk of stream data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Child standard output.
    Stdout,
    /// Child standard error.
    Stderr,
    /// Input typed by the user.
    Stdin,
}

/// Level of a leveled message (browser console style).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    /// Plain `console.log`.
    #[default]
    Log,
    /// Informational.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
    /// Debug output.
    Debug,
}

impl MessageLevel {
    /// Returns the string representation of this level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }
}

/// Lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum EventKind {
    Exit,
}

/// The payload carried by a [`Record`]. Exactly one kind per record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Terminal data, base64-encoded.
    Stream {
        /// Where the bytes came from.
        origin: Origin,
        /// Base64 text of the raw bytes.
        data: String,
    },
    /// The captured process exited.
    Exit {
        /// Process exit code.
        code: i32,
    },
    /// A leveled free-text message.
    Message {
        /// Severity, rendered as `log` when absent.
        level: Option<MessageLevel>,
        /// Message text.
        message: String,
        /// Source URL, if known.
        url: Option<String>,
    },
}

/// One captured event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireRecord", into = "WireRecord")]
pub struct Record {
    /// Epoch milliseconds; the ordering key within a stream.
    pub ts: i64,
    /// What was captured.
    pub payload: Payload,
}

/// Flat wire representation.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireRecord {
    ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stream: Option<Origin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event: Option<EventKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    level: Option<MessageLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

impl TryFrom<WireRecord> for Record {
    type Error = &'static str;

    fn try_from(wire: WireRecord) -> Result<Self, Self::Error> {
        let kinds = usize::from(wire.data.is_some())
            + usize::from(wire.event.is_some())
            + usize::from(wire.message.is_some());
        if kinds != 1 {
            return Err("record must carry exactly one payload kind");
        }

        let payload = if let Some(data) = wire.data {
            Payload::Stream {
                origin: wire.stream.unwrap_or(Origin::Stdout),
                data,
            }
        } else if let Some(EventKind::Exit) = wire.event {
            Payload::Exit {
                code: wire.code.unwrap_or(0),
            }
        } else if let Some(message) = wire.message {
            Payload::Message {
                level: wire.level,
                message,
                url: wire.url,
            }
        } else {
            return Err("record must carry exactly one payload kind");
        };

        Ok(Self {
            ts: wire.ts,
            payload,
        })
    }
}

impl From<Record> for WireRecord {
    fn from(record: Record) -> Self {
        let mut wire = Self {
            ts: record.ts,
            ..Self::default()
        };
        match record.payload {
            Payload::Stream { origin, data } => {
                wire.stream = Some(origin);
                wire.data = Some(data);
            }
            Payload::Exit { code } => {
                wire.event = Some(EventKind::Exit);
                wire.code = Some(code);
            }
            Payload::Message {
                level,
                message,
                url,
            } => {
                wire.level = level;
                wire.message = Some(message);
                wire.url = url;
            }
        }
        wire
    }
}

impl Record {
    /// Creates a stream-data record, base64-encoding `bytes`.
    #[must_use]
    pub fn output(ts: i64, origin: Origin, bytes: &[u8]) -> Self {
        Self {
            ts,
            payload: Payload::Stream {
                origin,
                data: STANDARD.encode(bytes),
            },
        }
    }

    /// Creates an exit-event record.
    #[must_use]
    pub const fn exit(ts: i64, code: i32) -> Self {
        Self {
            ts,
            payload: Payload::Exit { code },
        }
    }

    /// Creates a leveled message record.
    #[must_use]
    pub fn message(
        ts: i64,
        level: MessageLevel,
        message: impl Into<String>,
        url: Option<String>,
    ) -> Self {
        Self {
            ts,
            payload: Payload::Message {
                level: Some(level),
                message: message.into(),
                url,
            },
        }
    }

    /// Parses one NDJSON line. Malformed lines yield `None`.
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        serde_json::from_str(line).ok()
    }

    /// Serializes this record as a single JSON line (without the newline).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Renders this record as display text.
    ///
    /// Stream data is base64-decoded (invalid UTF-8 is replaced), exit events
    /// become a bracketed notice and messages are prefixed with their level.
    /// Undecodable base64 renders as an empty string.
    #[must_use]
    pub fn render(&self) -> String {
        match &self.payload {
            Payload::Stream { data, .. } => STANDARD
                .decode(data)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default(),
            Payload::Exit { code } => format!("\n[Process exited with code {code}]\n"),
            Payload::Message { level, message, .. } => {
                format!("[{}] {message}", level.unwrap_or_default().as_str())
            }
        }
    }
}

/// Current time as epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Normalizes a user-supplied stream name.
///
/// Every character outside `[a-zA-Z0-9_-]` becomes `_`, then the result is
/// lowercased.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Returns true if `name` is already in sanitized form and non-empty.
#[must_use]
pub fn is_sanitized(name: &str) -> bool {
    !name.is_empty() && sanitize_name(name) == name
}

/// Returns the external URI of a stream.
#[must_use]
pub fn stream_uri(name: &str) -> String {
    format!("{STREAM_URI_SCHEME}{name}")
}
