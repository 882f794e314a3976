//! Collector configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use vibelog_logs::paths;
use vibelog_logs::retention::DEFAULT_RETENTION;

/// Default collector port.
pub const DEFAULT_PORT: u16 = 51234;

/// Default maximum ingest body size (10 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Configuration for the collector server.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Address to bind the HTTP server to.
    pub bind_addr: SocketAddr,
    /// Directory holding stream files and the leadership lock.
    pub log_dir: PathBuf,
    /// Maximum age of a stream before it is purged.
    pub retention: Duration,
    /// How often the retention sweep runs.
    pub purge_interval: Duration,
    /// Per-subscriber notification queue depth.
    pub notification_capacity: usize,
    /// Keepalive ping interval on the notification websocket.
    pub ws_ping_interval: Duration,
    /// Maximum request body size in bytes.
    pub body_limit: usize,
    /// CORS allowed origins (empty means all).
    pub cors_origins: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            log_dir: paths::log_directory(),
            retention: DEFAULT_RETENTION,
            purge_interval: Duration::from_secs(60 * 60),
            notification_capacity: 64,
            ws_ping_interval: Duration::from_secs(30),
            body_limit: DEFAULT_BODY_LIMIT,
            cors_origins: Vec::new(),
        }
    }
}

impl CollectorConfig {
    /// Create a new configuration storing streams under `log_dir`.
    #[must_use]
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Self::default()
        }
    }

    /// Set the bind address.
    #[must_use]
    pub const fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the retention window.
    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the purge interval.
    #[must_use]
    pub const fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    /// Set the per-subscriber notification queue depth.
    #[must_use]
    pub const fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    /// Set the websocket ping interval.
    #[must_use]
    pub const fn with_ws_ping_interval(mut self, interval: Duration) -> Self {
        self.ws_ping_interval = interval;
        self
    }

    /// Set the maximum request body size.
    #[must_use]
    pub const fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Add a CORS allowed origin.
    #[must_use]
    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origins.push(origin.into());
        self
    }
}
