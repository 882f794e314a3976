//! Error types for stream storage and queries.

use thiserror::Error;

/// Errors that can occur while storing or removing streams.
#[derive(Debug, Error)]
pub enum LogError {
    /// The stream name is not in sanitized form.
    #[error("invalid stream name: {0:?}")]
    InvalidName(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the query engine.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The stream is not in the index.
    #[error("stream not found: {0}")]
    NotFound(String),

    /// The `since` filter is not an ISO-8601 timestamp.
    #[error("invalid since timestamp: {0:?}")]
    InvalidSince(String),

    /// Reading the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, LogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = LogError::InvalidName("../etc".to_string());
        assert_eq!(err.to_string(), "invalid stream name: \"../etc\"");

        let err = QueryError::NotFound("demo".to_string());
        assert_eq!(err.to_string(), "stream not found: demo");

        let err = QueryError::InvalidSince("yesterday".to_string());
        assert_eq!(err.to_string(), "invalid since timestamp: \"yesterday\"");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LogError>();
        assert_send_sync::<QueryError>();
    }

    #[test]
    fn error_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: LogError = io_err.into();
        assert!(err.to_string().contains("I/O error"));

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: QueryError = io_err.into();
        assert!(matches!(err, QueryError::Io(_)));
    }
}
