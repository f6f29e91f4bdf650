//! Error types for linkshelf.
//!
//! Library crates use [`LinkshelfError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all linkshelf operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkshelfError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP transport error while fetching a page.
    #[error("network error: {0}")]
    Network(String),

    /// The remote server answered with something other than `200 OK`.
    #[error("unexpected HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// A job payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A record identifier is not in the expected format.
    #[error("invalid record id '{value}': {reason}")]
    InvalidId { value: String, reason: String },

    /// The requested record does not exist.
    #[error("record {id} not found")]
    NotFound { id: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Message broker error (connection, stream closed, ack failure).
    #[error("broker error: {0}")]
    Broker(String),

    /// The record was stored but its enrichment job could not be published.
    #[error("record {id} created but enrichment job was not published: {message}")]
    PublishFailed { id: String, message: String },

    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: &'static str, millis: u64 },

    /// The governing cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad URL, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LinkshelfError>;

impl LinkshelfError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error for a record id.
    pub fn not_found(id: impl ToString) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Broker-level failures end the consumption loop; everything else is
    /// contained within a single processing cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Broker(_))
    }

    /// Whether this error means the record no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
