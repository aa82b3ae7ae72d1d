//! Error taxonomy shared by every stage of the ingestion pipeline.
//!
//! Each variant corresponds to one row of the pipeline's error policy table:
//! transient transport problems are retryable, everything user- or
//! content-shaped is terminal for the item that produced it. Batch execution
//! never aborts on an item error; the per-item outcome records the kind.

use serde::{Deserialize, Serialize};

/// Convenient result alias for pipeline operations.
pub type IngestResult<T> = Result<T, IngestError>;

/// Unified error type for the fund report ingestion pipeline.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Bad user input (search criteria, batch requests). Never enqueued.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The disclosure portal answered non-2xx or with a body we cannot read.
    #[error("portal error (status {status}): {snippet}")]
    Portal { status: u16, snippet: String },

    /// The artifact download answered non-2xx.
    #[error("HTTP {status} while fetching {url}")]
    Http { status: u16, url: String },

    /// Transport-level failure before an HTTP status was obtained.
    #[error("network error: {0}")]
    Network(String),

    /// An operation exceeded its step timeout.
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// Format detection ended at UNKNOWN and every fallback was exhausted.
    #[error("unrecognized artifact format: {0}")]
    Format(String),

    /// Extractor or concept-mapper failure on a well-formed artifact.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Local filesystem failure (artifact writes, taxonomy loads).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database connectivity problem; the persist step may be retried.
    #[error("database transport error: {0}")]
    DbTransport(String),

    /// Constraint or validation violation inside the database. Terminal.
    #[error("database constraint violation: {0}")]
    DbConstraint(String),

    /// User-initiated cancellation. Not a failure.
    #[error("task cancelled")]
    Cancelled,

    /// Invariant breakage that has no better classification.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Machine-readable error kind, stored inside per-item task outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Portal,
    Http,
    Network,
    Timeout,
    Format,
    Parse,
    Io,
    DbTransport,
    DbConstraint,
    Cancelled,
    Internal,
}

impl IngestError {
    /// The machine-readable kind recorded in `ItemOutcome.error`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Validation(_) => ErrorKind::Validation,
            IngestError::Portal { .. } => ErrorKind::Portal,
            IngestError::Http { .. } => ErrorKind::Http,
            IngestError::Network(_) => ErrorKind::Network,
            IngestError::Timeout { .. } => ErrorKind::Timeout,
            IngestError::Format(_) => ErrorKind::Format,
            IngestError::Parse(_) => ErrorKind::Parse,
            IngestError::Io(_) => ErrorKind::Io,
            IngestError::DbTransport(_) => ErrorKind::DbTransport,
            IngestError::DbConstraint(_) => ErrorKind::DbConstraint,
            IngestError::Cancelled => ErrorKind::Cancelled,
            IngestError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a retry of the failing step can reasonably succeed.
    ///
    /// 5xx statuses and transport failures are transient; everything else
    /// (4xx, malformed content, constraint violations) is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Network(_) | IngestError::Timeout { .. } | IngestError::DbTransport(_) => {
                true
            }
            IngestError::Portal { status, .. } | IngestError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IngestError::Timeout {
                operation: "http request".to_string(),
                seconds: 0,
            }
        } else if let Some(status) = err.status() {
            IngestError::Http {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            IngestError::Network(err.to_string())
        }
    }
}

impl From<diesel::result::Error> for IngestError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        match &err {
            Error::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::NotNullViolation
                | DatabaseErrorKind::CheckViolation => {
                    IngestError::DbConstraint(info.message().to_string())
                }
                _ => IngestError::DbTransport(info.message().to_string()),
            },
            _ => IngestError::DbTransport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Parse(err.to_string())
    }
}
