//! Error types for the NGSI-LD GraphQL gateway.

use async_graphql::ErrorExtensions;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// A specialized `Result` type for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type for schema compilation and query resolution.
#[derive(Debug, Error)]
pub enum Error {
    /// The upstream store has no entity with the given id.
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// The arguments of a query were invalid (e.g. neither type nor id).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A filter argument could not be interpreted.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// The upstream store answered with a non-success status.
    #[error("Upstream error {status}: {message}")]
    Upstream {
        /// HTTP status code returned by the store.
        status: u16,
        /// Status text or response body.
        message: String,
    },

    /// The upstream store could not be reached or returned an unreadable body.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request was aborted before the upstream call completed.
    #[error("Request cancelled")]
    Cancelled,

    /// A type definition violates a build-time invariant.
    #[error("Definition error: {0}")]
    Definition(String),

    /// The generated GraphQL schema could not be assembled.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the underlying I/O system.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that occurred during data serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// The standard JSON response body for an API error.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// A human-readable error message.
    pub error: String,
    /// A machine-readable error code string.
    pub code: String,
}

impl Error {
    /// Returns `true` for a missing upstream entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns `true` if the request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::InvalidFilter(_) => StatusCode::BAD_REQUEST,
            Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Error::Transport(_) => StatusCode::BAD_GATEWAY,
            // nginx's "client closed request"
            Error::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Error::Definition(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Schema(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a machine-readable error code string for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::InvalidFilter(_) => "INVALID_FILTER",
            Error::Upstream { .. } => "UPSTREAM_ERROR",
            Error::Transport(_) => "TRANSPORT_ERROR",
            Error::Cancelled => "CANCELLED",
            Error::Definition(_) => "DEFINITION_ERROR",
            Error::Schema(_) => "SCHEMA_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Convert into a GraphQL error carrying the error code as extension.
    pub fn into_graphql(self) -> async_graphql::Error {
        let code = self.error_code();
        async_graphql::Error::new(self.to_string()).extend_with(|_, ext| ext.set("code", code))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.error_code().to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Error::Upstream {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => Error::Transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("urn:ngsi-ld:Room:1".to_string());
        assert!(err.to_string().contains("not found"));
        assert!(err.to_string().contains("Room:1"));

        let err = Error::Upstream {
            status: 500,
            message: "Internal Server Error".to_string(),
        };
        assert_eq!(err.to_string(), "Upstream error 500: Internal Server Error");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::InvalidInput("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::Cancelled.status_code().as_u16(), 499);
        assert_eq!(Error::Cancelled.error_code(), "CANCELLED");
    }

    #[test]
    fn test_predicates() {
        assert!(Error::NotFound("a".into()).is_not_found());
        assert!(!Error::Cancelled.is_not_found());
        assert!(Error::Cancelled.is_cancelled());
    }

    #[test]
    fn test_graphql_error_code() {
        let err = Error::InvalidFilter("bad".into()).into_graphql();
        assert!(err.message.contains("bad"));
        let code = err.extensions.as_ref().and_then(|e| e.get("code")).cloned();
        assert_eq!(code, Some(async_graphql::Value::from("INVALID_FILTER")));
    }

    #[test]
    fn test_from_serde() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
