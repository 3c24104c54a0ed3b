//! Core error types for Qflow.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Invalid encoding
    #[error("Invalid encoding: {reason}")]
    InvalidEncoding {
        /// Decoder message
        reason: String,
    },

    /// Invalid ID format
    #[error("Invalid ID: {reason}")]
    InvalidId {
        /// Why the id was rejected
        reason: String,
    },

    /// Validation error
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// Offending field
        field: String,
        /// Why validation failed
        reason: String,
    },

    /// Not found
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind
        kind: String,
        /// Entity id
        id: String,
    },

    /// Already exists
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Entity kind
        kind: String,
        /// Entity id
        id: String,
    },

    /// Capacity exceeded
    #[error("Capacity exceeded for {resource}: {limit}")]
    CapacityExceeded {
        /// Resource name
        resource: String,
        /// Configured limit
        limit: u64,
    },

    /// Timeout
    #[error("Timeout: {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
    },

    /// Cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error (for unexpected errors)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidEncoding {
            reason: err.to_string(),
        }
    }
}
