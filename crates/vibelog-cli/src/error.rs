//! CLI error types.

use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid configuration or arguments.
    #[error("configuration error: {0}")]
    Config(String),

    /// The collector could not be reached or answered with an error.
    #[error("collector error: {0}")]
    Collector(String),

    /// The capture session failed.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The collector server failed.
    #[error(transparent)]
    Server(#[from] vibelog_server::ServerError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures delivering a batch to the collector.
#[derive(Debug, Error)]
pub enum ShipError {
    /// The request did not complete.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The collector answered with a non-success status.
    #[error("collector returned status {0}")]
    Status(u16),

    /// The retry buffer could not be read or written.
    #[error("retry buffer error: {0}")]
    Buffer(#[from] std::io::Error),
}

/// Failures running a command under a pseudo-terminal.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No command was given.
    #[error("no command given")]
    EmptyCommand,

    /// The pseudo-terminal could not be created or used.
    #[error("pty error: {0}")]
    Pty(String),

    /// The child process could not be started.
    #[error("failed to spawn {command}: {reason}")]
    Spawn {
        /// Program name.
        command: String,
        /// Underlying failure.
        reason: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
