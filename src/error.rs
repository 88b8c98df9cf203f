//! Error types for pagetree

use std::time::Duration;

/// The main error type for pagetree operations.
///
/// The first five variants are policy errors: they are raised before any
/// mutation is applied and retrying will not help. The remaining variants
/// come from storage or the runtime and abort the surrounding transaction.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Missing, or outside the caller's space. Both cases look the same.
    #[error("Not found: {0}")]
    DataNotFound(String),

    #[error("Insecure operation: {0}")]
    InsecureOperation(String),

    #[error("Undesirable operation: {0}")]
    UndesirableOperation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    Storage(#[from] heed::Error),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Transaction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Error::DataNotFound(format!("{what} {id}"))
    }

    /// True when the failure happened mid-transaction and the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Constraint(_) | Error::Timeout(_))
    }

    /// Stable machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::DataNotFound(_) => "data_not_found",
            Error::InsecureOperation(_) => "insecure_operation",
            Error::UndesirableOperation(_) => "undesirable_operation",
            Error::InvalidState(_) => "invalid_state",
            Error::Storage(_) | Error::Constraint(_) | Error::Timeout(_) => "transient",
            Error::Cancelled => "cancelled",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }
}

/// Result type alias for pagetree operations
pub type Result<T> = std::result::Result<T, Error>;
