//! Fetch error taxonomy.

use thiserror::Error;

/// A failed fetch attempt.
///
/// Cloneable so one in-flight result can be handed to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// Connection-level failure (DNS, refused, reset).
    #[error("network error: {0}")]
    Network(String),

    /// The attempt exceeded its deadline.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The response body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// The fetch was superseded by an invalidation or removal of its key.
    #[error("query superseded")]
    Superseded,

    #[error("{0}")]
    Other(String),
}

/// How the retry layer treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 400-499: terminal, surfaced immediately.
    Client,
    /// Anything else: retryable up to the ceiling.
    Transient,
}

impl FetchError {
    /// Numeric HTTP status, when the error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self.status() {
            Some(status) if (400..500).contains(&status) => ErrorClass::Client,
            _ => ErrorClass::Transient,
        }
    }
}

/// Errors surfaced by typed query access.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("cached value does not match requested type: {0}")]
    Deserialize(String),
}

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;
