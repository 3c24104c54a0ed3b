//! Where pre-warming work lands.

use crate::pattern::PatternKey;
use async_trait::async_trait;

/// Error from a pre-warming sub-step
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PrewarmError(pub String);

impl PrewarmError {
    /// Create from any displayable reason
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

/// Receiver of pre-warming work. Every method must be safe to repeat.
#[async_trait]
pub trait PrewarmTarget: Send + Sync + 'static {
    /// Populate up to `entries` cache entries for the pattern
    async fn warm_cache(&self, key: &PatternKey, entries: usize) -> Result<(), PrewarmError>;

    /// Make `count` sandbox runtimes ready for the pattern
    async fn warm_runtimes(&self, key: &PatternKey, count: usize) -> Result<(), PrewarmError>;

    /// Open `count` connections for the pattern
    async fn warm_connections(&self, key: &PatternKey, count: usize) -> Result<(), PrewarmError>;
}

/// Target that accepts every request and does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTarget;

#[async_trait]
impl PrewarmTarget for NoopTarget {
    async fn warm_cache(&self, _key: &PatternKey, _entries: usize) -> Result<(), PrewarmError> {
        Ok(())
    }

    async fn warm_runtimes(&self, _key: &PatternKey, _count: usize) -> Result<(), PrewarmError> {
        Ok(())
    }

    async fn warm_connections(&self, _key: &PatternKey, _count: usize) -> Result<(), PrewarmError> {
        Ok(())
    }
}
