//! Error types for playlist-archiver
//!
//! This module provides the library-wide error type plus the structured error
//! body returned by the REST API:
//! - Domain-specific error variants (Config, Database, ExternalTool, etc.)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes
//!
//! Item-level download failures are *not* errors in this sense. They are
//! recorded as [`ErrorKind`](crate::types::ErrorKind) on the item outcome so
//! that a failing item never aborts a batch.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for playlist-archiver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for playlist-archiver
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "watch_policy.min_interval_minutes")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (yt-dlp, ffprobe)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Source listing could not be obtained
    #[error("source query failed for {source_id}: {message}")]
    SourceQuery {
        /// Source whose listing failed
        source_id: String,
        /// What went wrong
        message: String,
    },

    /// A run summary could not be delivered
    #[error("notification via {notifier} failed: {message}")]
    Notification {
        /// Notifier that failed
        notifier: String,
        /// What went wrong
        message: String,
    },

    /// Requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Another run holds the single-run gate
    #[error(transparent)]
    Busy(#[from] crate::registry::Busy),

    /// Shutdown in progress - not accepting new runs
    #[error("shutdown in progress: not accepting new runs")]
    ShuttingDown,

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Config file watching error
    #[error("config watch error: {0}")]
    ConfigWatch(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored value could not be decoded
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

/// Standard API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "run_in_progress",
///     "message": "a run is already in progress",
///     "details": { "run_id": 12 }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::NotFound(_) => 404,
            Error::Busy(_) => 409,

            Error::Database(_)
            | Error::Sqlx(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::ApiServerError(_)
            | Error::ConfigWatch(_)
            | Error::Other(_) => 500,

            Error::Network(_) | Error::SourceQuery { .. } | Error::Notification { .. } => 502,

            Error::ShuttingDown | Error::ExternalTool(_) => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::SourceQuery { .. } => "source_query_error",
            Error::Notification { .. } => "notification_error",
            Error::NotFound(_) => "not_found",
            Error::Busy(_) => "run_in_progress",
            Error::ShuttingDown => "shutting_down",
            Error::ApiServerError(_) => "api_server_error",
            Error::ConfigWatch(_) => "config_watch_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            Error::SourceQuery { source_id, .. } => {
                Some(serde_json::json!({ "source_id": source_id }))
            }
            Error::Busy(busy) => Some(serde_json::json!({ "run_id": busy.run_id })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
