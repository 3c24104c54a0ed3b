//! Where recommendations are applied.

use crate::error::OptimizationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Capacity ready right now
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    /// Idle sandbox runtimes
    pub runtimes: usize,
    /// Loaded cache entries
    pub cache_entries: usize,
}

/// Applies recommendations
#[async_trait]
pub trait OptimizationTarget: Send + Sync + 'static {
    /// Capacity ready now
    async fn capacity(&self) -> Capacity;

    /// Add up to `count` runtimes; returns how many were added
    async fn scale_runtimes(&self, count: usize) -> Result<usize, OptimizationError>;

    /// Load up to `entries` cache entries; returns how many were loaded
    async fn warm_cache(&self, entries: usize) -> Result<usize, OptimizationError>;
}
