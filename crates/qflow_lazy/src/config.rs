//! Lazy loading configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache and preload settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LazyConfig {
    /// Cache capacity in bytes, after compression
    pub max_cache_size: usize,
    /// Limit on a single loader call
    pub load_timeout_ms: u64,
    /// Account large components as compressed
    pub compression_enabled: bool,
    /// Size above which a component is compressed
    pub compression_threshold: usize,
    /// Stored size as a fraction of the original when compressed
    pub compression_ratio: f64,
    /// Loads running at once during a preload
    pub preload_concurrency: usize,
    /// Priority at which the default strategy preloads
    pub preload_priority: u8,
    /// Access count above which the default strategy preloads
    pub preload_access_threshold: u64,
    /// Period of the preload loop
    pub preload_interval_ms: u64,
}

impl LazyConfig {
    /// Loader timeout as a duration
    #[must_use]
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    /// Preload loop period
    #[must_use]
    pub fn preload_interval(&self) -> Duration {
        Duration::from_millis(self.preload_interval_ms)
    }

    /// Bytes a component of `size` takes in the cache, and whether it was
    /// compressed
    #[must_use]
    pub fn stored_size(&self, size: usize) -> (usize, bool) {
        if self.compression_enabled && size > self.compression_threshold {
            let stored = (size as f64 * self.compression_ratio.clamp(0.0, 1.0)).ceil() as usize;
            (stored, true)
        } else {
            (size, false)
        }
    }

    /// Apply the fields set in `patch`
    pub fn apply(&mut self, patch: &LazyConfigPatch) {
        if let Some(v) = patch.max_cache_size {
            self.max_cache_size = v;
        }
        if let Some(v) = patch.load_timeout_ms {
            self.load_timeout_ms = v.max(1);
        }
        if let Some(v) = patch.compression_enabled {
            self.compression_enabled = v;
        }
        if let Some(v) = patch.preload_concurrency {
            self.preload_concurrency = v.max(1);
        }
    }
}

impl Default for LazyConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 100 * 1024 * 1024,
            load_timeout_ms: 30_000,
            compression_enabled: true,
            compression_threshold: 1024 * 1024,
            compression_ratio: 0.7,
            preload_concurrency: 10,
            preload_priority: 8,
            preload_access_threshold: 5,
            preload_interval_ms: 60_000,
        }
    }
}

/// Hot-reloadable subset of [`LazyConfig`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LazyConfigPatch {
    /// New capacity; shrinking evicts
    pub max_cache_size: Option<usize>,
    /// New loader timeout
    pub load_timeout_ms: Option<u64>,
    /// Toggle compression for future loads
    pub compression_enabled: Option<bool>,
    /// New preload concurrency
    pub preload_concurrency: Option<usize>,
}
