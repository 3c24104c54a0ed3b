//! Pool errors.

use qflow_core::ResourceKind;

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors raised by pools and the pool registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The factory did not produce a resource in time
    #[error("pool {pool}: resource creation timed out after {timeout_ms}ms")]
    CreationTimeout {
        /// Pool name
        pool: String,
        /// Configured limit
        timeout_ms: u64,
    },

    /// No resource became available in time
    #[error("pool {pool}: acquisition timed out after {timeout_ms}ms")]
    AcquisitionTimeout {
        /// Pool name
        pool: String,
        /// Configured limit
        timeout_ms: u64,
    },

    /// The factory failed to create a resource
    #[error("pool {pool}: resource creation failed: {reason}")]
    Creation {
        /// Pool name
        pool: String,
        /// Factory message
        reason: String,
    },

    /// The pool is draining or drained
    #[error("pool {pool} is closed")]
    Closed {
        /// Pool name
        pool: String,
    },

    /// The wait queue is full and the strategy rejects
    #[error("pool {pool}: wait queue full ({waiters} waiters)")]
    Backpressure {
        /// Pool name
        pool: String,
        /// Queue depth at rejection
        waiters: usize,
    },

    /// Requested bounds are inconsistent
    #[error("invalid pool bounds: min {min}, max {max}")]
    InvalidBounds {
        /// Requested minimum
        min: usize,
        /// Requested maximum
        max: usize,
    },

    /// No pool registered under the name
    #[error("unknown pool: {name}")]
    UnknownPool {
        /// Requested name
        name: String,
    },

    /// A pool with the name is already registered
    #[error("pool already registered: {name}")]
    DuplicatePool {
        /// Conflicting name
        name: String,
    },

    /// No pool serves the resource kind
    #[error("no pool registered for {kind}")]
    NoPoolForKind {
        /// Requested kind
        kind: ResourceKind,
    },

    /// A lease was returned to a pool that did not issue it
    #[error("lease from pool {lease_pool} returned to pool {pool}")]
    ForeignLease {
        /// Pool the lease was returned to
        pool: String,
        /// Pool that issued the lease
        lease_pool: String,
    },
}

impl PoolError {
    /// Whether retrying the acquisition later could succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CreationTimeout { .. }
                | Self::AcquisitionTimeout { .. }
                | Self::Creation { .. }
                | Self::Backpressure { .. }
        )
    }
}

/// Error produced by a resource factory
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct FactoryError(pub String);

impl FactoryError {
    /// Create from any displayable reason
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

impl From<std::io::Error> for FactoryError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = PoolError::AcquisitionTimeout {
            pool: "wasm".to_string(),
            timeout_ms: 50,
        };
        assert_eq!(err.to_string(), "pool wasm: acquisition timed out after 50ms");
        assert!(err.is_transient());
        assert!(!PoolError::Closed { pool: "x".to_string() }.is_transient());
    }
}
