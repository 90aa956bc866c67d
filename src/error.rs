//! Error types for docbatch
//!
//! This module provides error handling for the batch engine, including:
//! - Domain-specific error types (Job, Fetch, Merge, Database)
//! - HTTP status code mapping so a host route layer can render responses
//! - Structured error bodies with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for docbatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for docbatch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "fetch.concurrency")
        key: Option<String>,
    },

    /// Malformed submission, rejected before a job is created
    #[error("validation error: {0}")]
    Validation(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Job or group lookup/state error
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// Source retrieval failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Document merge failed
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error outside source retrieval (client construction, callbacks)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress
    #[error("shutdown in progress")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
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

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate group name)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Job and group errors surfaced to callers
#[derive(Debug, Error)]
pub enum JobError {
    /// Job does not exist or belongs to another principal
    #[error("job {id} not found")]
    NotFound {
        /// The job ID that was not found
        id: String,
    },

    /// Job outputs were reclaimed by the retention sweep
    #[error("job {id} has expired and its files are no longer available")]
    Expired {
        /// The expired job ID
        id: String,
    },

    /// Group does not exist within the job
    #[error("group {name} not found in job {id}")]
    GroupNotFound {
        /// The job ID
        id: String,
        /// The group name that was not found
        name: String,
    },

    /// Group output is not available (not completed yet, or failed)
    #[error("output for group {name} in job {id} is not available")]
    OutputNotReady {
        /// The job ID
        id: String,
        /// The group name
        name: String,
    },

    /// Operation is not allowed in the job's current state
    #[error("cannot {operation} job {id} in state {current_state}")]
    InvalidState {
        /// The job ID
        id: String,
        /// The attempted operation (e.g., "delete", "process")
        operation: String,
        /// The current job state
        current_state: String,
    },

    /// Job has groups that already left `pending`; deleting would destroy history
    #[error("job {id} has processed groups and cannot be deleted")]
    HasProcessedGroups {
        /// The job ID
        id: String,
    },
}

/// Classified source retrieval failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Request exceeded the configured timeout
    #[error("timeout after {timeout_ms}ms, the server is not responding")]
    Timeout {
        /// The timeout that elapsed, in milliseconds
        timeout_ms: u64,
    },

    /// Host name could not be resolved
    #[error("DNS resolution failed: {0}")]
    Dns(String),

    /// Remote host refused the connection
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// TLS handshake or certificate validation failed
    #[error("TLS/certificate error: {0} (certificate validation can be disabled with fetch.accept_invalid_certs)")]
    Tls(String),

    /// Remote answered with a non-success status
    #[error("HTTP {status}{}", reason.as_deref().map(|r| format!(" {}", r)).unwrap_or_default())]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Canonical reason phrase, when known
        reason: Option<String>,
    },

    /// Any other network-level failure
    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    /// Short machine-readable kind, stable across message changes
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout { .. } => "timeout",
            FetchError::Dns(_) => "dns",
            FetchError::ConnectionRefused(_) => "connection_refused",
            FetchError::Tls(_) => "tls",
            FetchError::HttpStatus { .. } => "http_status",
            FetchError::Network(_) => "network",
        }
    }

    /// HTTP status code, if the remote responded
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Document merge errors
#[derive(Debug, Error)]
pub enum MergeError {
    /// Buffer is neither a loadable document nor a supported raster image
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// Document could not be parsed
    #[error("failed to load document: {0}")]
    LoadFailed(String),

    /// Raster image could not be decoded or converted
    #[error("failed to convert image: {0}")]
    ImageConversion(String),

    /// Accumulator could not be serialized
    #[error("failed to serialize merged document: {0}")]
    SerializeFailed(String),

    /// No source could be appended
    #[error("all {count} sources failed{}", first_error.as_deref().map(|e| format!(" (first error: {})", e)).unwrap_or_default())]
    AllSourcesFailed {
        /// Number of sources attempted
        count: usize,
        /// First failure, in source order
        first_error: Option<String>,
    },

    /// Writing the output failed
    #[error("failed to write {path}: {reason}")]
    WriteFailed {
        /// Destination path
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },
}

/// API error body
///
/// ```json
/// {
///   "error": {
///     "code": "gone",
///     "message": "job 3f0c... has expired and its files are no longer available",
///     "details": { "job_id": "3f0c..." }
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
    /// Machine-readable error code (e.g., "not_found", "gone")
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

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
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
            Error::Validation(_) => 400,

            Error::Job(JobError::NotFound { .. }) => 404,
            Error::Job(JobError::GroupNotFound { .. }) => 404,
            Error::Job(JobError::OutputNotReady { .. }) => 404,

            // 410 Gone - the resource existed but was reclaimed
            Error::Job(JobError::Expired { .. }) => 410,

            Error::Job(JobError::InvalidState { .. }) => 409,
            Error::Job(JobError::HasProcessedGroups { .. }) => 409,

            Error::Merge(_) => 422,

            Error::Fetch(_) => 502,
            Error::Network(_) => 502,

            Error::ShuttingDown => 503,

            Error::Database(_)
            | Error::Sqlx(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Other(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Validation(_) => "validation_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Job(e) => match e {
                JobError::NotFound { .. } => "not_found",
                JobError::Expired { .. } => "gone",
                JobError::GroupNotFound { .. } => "group_not_found",
                JobError::OutputNotReady { .. } => "output_not_ready",
                JobError::InvalidState { .. } => "invalid_state",
                JobError::HasProcessedGroups { .. } => "has_processed_groups",
            },
            Error::Fetch(e) => e.kind(),
            Error::Merge(_) => "merge_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Job(JobError::NotFound { id })
            | Error::Job(JobError::Expired { id })
            | Error::Job(JobError::HasProcessedGroups { id }) => Some(serde_json::json!({
                "job_id": id,
            })),
            Error::Job(JobError::GroupNotFound { id, name })
            | Error::Job(JobError::OutputNotReady { id, name }) => Some(serde_json::json!({
                "job_id": id,
                "group": name,
            })),
            Error::Job(JobError::InvalidState {
                id,
                operation,
                current_state,
            }) => Some(serde_json::json!({
                "job_id": id,
                "operation": operation,
                "current_state": current_state,
            })),
            Error::Fetch(e) => e.status_code().map(|status| {
                serde_json::json!({
                    "upstream_status": status,
                })
            }),
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
