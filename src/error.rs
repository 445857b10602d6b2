//! Error types for report-stream
//!
//! This module provides the error taxonomy of the export pipeline:
//! - [`ValidationError`] - bad request shape, rejected before any worker starts
//! - [`FetchError`] - remote data source failures, fatal to the export
//! - [`ReassemblyError`] - invalid chunks reaching the buffer or the sink
//! - [`WriteError`] - document writer or output stream failures
//!
//! It also provides HTTP status code mapping and the structured JSON error body
//! used by the API layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for report-stream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for report-stream
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "pipeline.workers")
        key: Option<String>,
    },

    /// Request rejected before the pipeline started
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// Remote data source failure
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Invalid chunk sequence
    #[error("reassembly error: {0}")]
    Reassembly(#[from] ReassemblyError),

    /// Document writer or output stream failure
    #[error("write error: {0}")]
    Write(#[from] WriteError),

    /// Global export deadline expired
    #[error("export timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Export cancelled by the caller
    #[error("export cancelled")]
    Cancelled,

    /// Shutdown in progress - not accepting new exports
    #[error("shutdown in progress: not accepting new exports")]
    ShuttingDown,

    /// Export not found
    #[error("export not found: {0}")]
    NotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for `key`
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Request validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Report identifier missing
    #[error("report identifier must not be empty")]
    EmptyReport,

    /// Record count below one
    #[error("record count must be at least 1, got {0}")]
    NonPositiveRecords(i64),

    /// Record count above the configured maximum
    #[error("too many records requested: {requested} exceeds the maximum of {max}")]
    TooManyRecords {
        /// Records requested
        requested: u64,
        /// Configured maximum
        max: u64,
    },

    /// Unrecognized target format tag
    #[error("unsupported target format {0:?}")]
    UnsupportedFormat(String),
}

/// Remote data source errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection-level failure
    #[error("transport failure fetching offset {offset}: {message}")]
    Transport {
        /// Offset of the failed task
        offset: u64,
        /// Underlying error message
        message: String,
    },

    /// Request timed out
    #[error("request for offset {offset} timed out")]
    TimedOut {
        /// Offset of the failed task
        offset: u64,
    },

    /// Non-success HTTP status
    #[error("data source returned status {status} for offset {offset}")]
    Status {
        /// Offset of the failed task
        offset: u64,
        /// HTTP status code
        status: u16,
    },

    /// Response body could not be decoded
    #[error("could not decode page at offset {offset}: {message}")]
    Decode {
        /// Offset of the failed task
        offset: u64,
        /// Decoder error message
        message: String,
    },

    /// Page did not contain the requested number of rows
    #[error("page at offset {offset} has {actual} rows, expected {expected}")]
    RowCountMismatch {
        /// Offset of the failed task
        offset: u64,
        /// Rows requested
        expected: u64,
        /// Rows returned
        actual: u64,
    },

    /// Summary lookup failed
    #[error("summary for report {report:?} unavailable: {message}")]
    Summary {
        /// Report identifier
        report: String,
        /// Failure description
        message: String,
    },
}

impl FetchError {
    /// Whether a bounded retry may succeed (transport failures, timeouts, 5xx, 429)
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { .. } | FetchError::TimedOut { .. } => true,
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            FetchError::Decode { .. }
            | FetchError::RowCountMismatch { .. }
            | FetchError::Summary { .. } => false,
        }
    }
}

/// Chunk sequencing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    /// Chunk carries no rows
    #[error("chunk at offset {offset} is empty")]
    EmptyChunk {
        /// Chunk offset
        offset: u64,
    },

    /// Chunk starts before the next expected offset
    #[error("chunk at offset {offset} overlaps already emitted data (next expected {expected})")]
    Overlap {
        /// Chunk offset
        offset: u64,
        /// Next offset the buffer expects
        expected: u64,
    },

    /// Two chunks staged at the same offset
    #[error("duplicate chunk at offset {offset}")]
    Duplicate {
        /// Chunk offset
        offset: u64,
    },

    /// Chunk extends past the requested record count
    #[error("chunk [{offset}, {end}) extends past total of {total} records")]
    OutOfRange {
        /// Chunk offset
        offset: u64,
        /// Chunk end
        end: u64,
        /// Requested record count
        total: u64,
    },

    /// Chunk arrived after the final chunk was released
    #[error("chunk at offset {offset} arrived after the final chunk")]
    AfterLast {
        /// Chunk offset
        offset: u64,
    },

    /// Chunk is not the one the sink expects next, or is internally inconsistent
    #[error("malformed chunk at offset {offset}: {reason}")]
    Malformed {
        /// Chunk offset
        offset: u64,
        /// What is wrong with it
        reason: String,
    },

    /// Sink already wrote the closing structure
    #[error("chunk at offset {offset} delivered after the document was finalized")]
    AfterFinalize {
        /// Chunk offset
        offset: u64,
    },

    /// Sink stopped receiving
    #[error("export sink is no longer accepting chunks")]
    SinkClosed,

    /// Ready stream ended without a final chunk
    #[error("ready stream ended after {delivered} of {total} records without a final chunk")]
    Incomplete {
        /// Records delivered
        delivered: u64,
        /// Records requested
        total: u64,
    },
}

/// Document output errors
#[derive(Debug, Error)]
pub enum WriteError {
    /// Output stream I/O failure
    #[error("output stream failed: {0}")]
    Io(#[from] std::io::Error),

    /// Delimited record encoding failed
    #[error("delimited encoding failed: {0}")]
    Encode(#[from] csv::Error),

    /// Writer used out of order (rows before header, anything after close)
    #[error("{format} writer misuse: {reason}")]
    InvalidState {
        /// Format tag
        format: &'static str,
        /// Description of the misuse
        reason: String,
    },

    /// Row does not fit the column layout
    #[error("row {row} has {actual} cells, expected {expected}")]
    RowWidth {
        /// Row index within the chunk
        row: usize,
        /// Column count
        expected: usize,
        /// Cells in the row
        actual: usize,
    },
}

/// API error response format
///
/// ```json
/// {
///   "error": {
///     "code": "validation_error",
///     "message": "invalid request: report identifier must not be empty"
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
            Error::Validation(ValidationError::TooManyRecords { .. }) => 413,
            Error::Validation(_) => 400,

            Error::NotFound(_) => 404,

            Error::Fetch(_) => 502,
            Error::Timeout(_) => 504,

            Error::Cancelled => 499,
            Error::ShuttingDown => 503,

            Error::Reassembly(_)
            | Error::Write(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::ApiServerError(_)
            | Error::Other(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Validation(e) => match e {
                ValidationError::EmptyReport => "empty_report",
                ValidationError::NonPositiveRecords(_) => "invalid_record_count",
                ValidationError::TooManyRecords { .. } => "too_many_records",
                ValidationError::UnsupportedFormat(_) => "unsupported_format",
            },
            Error::Fetch(_) => "fetch_error",
            Error::Reassembly(_) => "reassembly_error",
            Error::Write(_) => "write_error",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::ShuttingDown => "shutting_down",
            Error::NotFound(_) => "not_found",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
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
            Error::Validation(ValidationError::TooManyRecords { requested, max }) => {
                Some(serde_json::json!({
                    "requested": requested,
                    "max": max,
                }))
            }
            Error::Fetch(FetchError::Status { offset, status }) => Some(serde_json::json!({
                "offset": offset,
                "status": status,
            })),
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
