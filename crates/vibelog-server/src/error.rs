//! Error types for the collector server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use vibelog_logs::{LogError, QueryError};

/// Result type alias for collector operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the collector server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(std::net::SocketAddr, std::io::Error),

    /// The requested stream does not exist.
    #[error("Log not found")]
    NotFound(String),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Writing to the log store failed.
    #[error("storage error: {0}")]
    Storage(#[from] LogError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<QueryError> for ServerError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::NotFound(name) => Self::NotFound(name),
            QueryError::InvalidSince(_) => Self::InvalidRequest(err.to_string()),
            QueryError::Io(e) => Self::Internal(e.to_string()),
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::BindFailed(_, _) | Self::Storage(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code,
        };

        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"error":"failed to serialize error","code":"internal_error"}"#.to_string()
        });

        (status, [("content-type", "application/json")], json).into_response()
    }
}
