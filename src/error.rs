//! Error types for zip-export
//!
//! This module provides the error taxonomy for the library:
//! - [`Error`] - run-level errors returned to the caller (setup, catalog, fatal auth)
//! - [`ExportError`] - classified failures of a single export call
//! - [`CatalogError`] - malformed catalog input, rejected at load time
//! - [`WriteError`] - an archive could not be persisted
//! - [`FailureReason`] - the serializable reason recorded per failed batch

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::RunReport;

/// Result type alias for zip-export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for zip-export
///
/// Per-batch failures never surface here; they are contained in the
/// [`RunReport`]. Only setup problems and a globally rejected credential
/// unwind a run.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "export.max_batch_size")
        key: Option<String>,
    },

    /// Input has the wrong shape (empty batch, blank file name, zero batch size)
    #[error("validation error: {0}")]
    Validation(String),

    /// Catalog could not be loaded or contains malformed records
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Credential could not be obtained or refreshed
    #[error("authentication error: {0}")]
    Auth(String),

    /// Every attempted batch was rejected for authentication reasons
    ///
    /// The partial report is attached so callers can still see which batches
    /// were dispatched before the run was stopped.
    #[error("credential rejected for all {attempted} attempted batches")]
    CredentialRejected {
        /// Number of batches that reached the export endpoint
        attempted: usize,
        /// Report accumulated up to the point the run was stopped
        report: Box<RunReport>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Classified failure of a single export call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExportError {
    /// Server-side or connection-level hiccup, worth retrying
    #[error("transient failure{}: {message}", fmt_status(.status))]
    Transient {
        /// HTTP status, if the server answered
        status: Option<u16>,
        /// Description of the failure
        message: String,
    },

    /// Session expired or credential invalid
    #[error("authentication rejected{}: {message}", fmt_status(.status))]
    Auth {
        /// HTTP status returned by the endpoint, absent if no credential could be obtained
        status: Option<u16>,
        /// Description of the failure
        message: String,
    },

    /// Endpoint refused the request payload
    #[error("request rejected (HTTP {status}): {message}")]
    ServerRejected {
        /// HTTP status returned by the endpoint
        status: u16,
        /// Description of the failure, usually a body excerpt
        message: String,
    },

    /// Request could not be built or encoded
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transport failed before a response was received
    #[error("network failure: {0}")]
    Network(String),

    /// Call exceeded its time budget
    #[error("export call timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl ExportError {
    /// HTTP status associated with the failure, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ExportError::Transient { status, .. } | ExportError::Auth { status, .. } => *status,
            ExportError::ServerRejected { status, .. } => Some(*status),
            ExportError::InvalidRequest(_)
            | ExportError::Network(_)
            | ExportError::Timeout(_) => None,
        }
    }
}

/// Malformed catalog input
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Record has no display name
    #[error("record {index} has an empty name")]
    MissingName {
        /// Position of the record in the input
        index: usize,
    },

    /// Record has no document identifier
    #[error("record {index} ({name}) has no document id")]
    MissingId {
        /// Position of the record in the input
        index: usize,
        /// Display name of the offending record
        name: String,
    },

    /// Two records share a display name
    #[error("duplicate file name in catalog: {name}")]
    DuplicateName {
        /// The repeated name
        name: String,
    },

    /// Input could not be parsed
    #[error("failed to parse catalog: {0}")]
    Parse(String),

    /// Catalog file could not be read or written
    #[error("catalog file {path}: {source}")]
    Io {
        /// Path of the catalog file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Failure to persist an archive
#[derive(Debug, Error)]
#[error("failed to write {path}: {source}")]
pub struct WriteError {
    /// Destination that could not be written
    pub path: PathBuf,
    /// Underlying I/O error
    #[source]
    pub source: std::io::Error,
}

/// Why a batch ended without an archive on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Retries exhausted on a transient failure (timeouts included)
    Transient {
        /// Last error message
        message: String,
        /// Last HTTP status, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        http_status: Option<u16>,
    },
    /// Retries exhausted on a transport failure
    Network {
        /// Last error message
        message: String,
    },
    /// Credential rejected by the endpoint or unavailable
    Auth {
        /// Error message
        message: String,
        /// HTTP status returned by the endpoint
        #[serde(skip_serializing_if = "Option::is_none")]
        http_status: Option<u16>,
    },
    /// Endpoint refused the payload
    ServerRejected {
        /// Error message
        message: String,
        /// HTTP status returned by the endpoint
        http_status: u16,
    },
    /// Request for the batch could not be built
    InvalidRequest {
        /// Error message
        message: String,
    },
    /// Archive was received but could not be persisted
    WriteError {
        /// Error message
        message: String,
    },
    /// Batch was never dispatched because the run was cancelled
    Cancelled,
}

impl FailureReason {
    /// HTTP status associated with the failure, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            FailureReason::Transient { http_status, .. }
            | FailureReason::Auth { http_status, .. } => *http_status,
            FailureReason::ServerRejected { http_status, .. } => Some(*http_status),
            _ => None,
        }
    }

    /// Returns true for credential failures
    pub fn is_auth(&self) -> bool {
        matches!(self, FailureReason::Auth { .. })
    }

    /// Returns true if the batch was never dispatched
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FailureReason::Cancelled)
    }
}

impl From<ExportError> for FailureReason {
    fn from(err: ExportError) -> Self {
        let message = err.to_string();
        match err {
            ExportError::Transient { status, .. } => FailureReason::Transient {
                message,
                http_status: status,
            },
            ExportError::Timeout(_) => FailureReason::Transient {
                message,
                http_status: None,
            },
            ExportError::InvalidRequest(_) => FailureReason::InvalidRequest { message },
            ExportError::Network(_) => FailureReason::Network { message },
            ExportError::Auth { status, .. } => FailureReason::Auth {
                message,
                http_status: status,
            },
            ExportError::ServerRejected { status, .. } => FailureReason::ServerRejected {
                message,
                http_status: status,
            },
        }
    }
}

impl From<&WriteError> for FailureReason {
    fn from(err: &WriteError) -> Self {
        FailureReason::WriteError {
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Transient { message, .. }
            | FailureReason::Network { message }
            | FailureReason::Auth { message, .. }
            | FailureReason::ServerRejected { message, .. }
            | FailureReason::InvalidRequest { message } => f.write_str(message),
            FailureReason::WriteError { message } => write!(f, "write error: {message}"),
            FailureReason::Cancelled => f.write_str("cancelled before dispatch"),
        }
    }
}
