//! Pool configuration.

use crate::backpressure::BackpressureController;
use crate::error::{PoolError, PoolResult};
use qflow_core::ResourceKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool name, unique within a manager
    pub name: String,
    /// Kind of resource the pool serves
    pub kind: ResourceKind,
    /// Resources to keep around
    pub min_size: usize,
    /// Hard cap on available plus in-use resources
    pub max_size: usize,
    /// Limit on a single factory `create`
    pub creation_timeout_ms: u64,
    /// Limit on waiting for a busy pool
    pub acquisition_timeout_ms: u64,
    /// Period of the background health sweep
    pub health_check_interval_ms: u64,
    /// Failed health checks in a row before a resource is destroyed
    pub max_consecutive_failures: u32,
    /// Call the factory's `reset` on every release
    pub reset_on_release: bool,
    /// Wait queue limits
    pub backpressure: BackpressureController,
}

impl PoolConfig {
    /// Create a configuration with defaults for the given pool
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }

    /// Set size bounds
    #[must_use]
    pub fn with_bounds(mut self, min_size: usize, max_size: usize) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    /// Set the creation timeout
    #[must_use]
    pub fn with_creation_timeout(mut self, timeout: Duration) -> Self {
        self.creation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the acquisition timeout
    #[must_use]
    pub fn with_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.acquisition_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the wait queue limits
    #[must_use]
    pub fn with_backpressure(mut self, backpressure: BackpressureController) -> Self {
        self.backpressure = backpressure;
        self
    }

    /// Reset resources on release
    #[must_use]
    pub fn with_reset_on_release(mut self, reset: bool) -> Self {
        self.reset_on_release = reset;
        self
    }

    /// Creation timeout as a duration
    #[must_use]
    pub fn creation_timeout(&self) -> Duration {
        Duration::from_millis(self.creation_timeout_ms)
    }

    /// Acquisition timeout as a duration
    #[must_use]
    pub fn acquisition_timeout(&self) -> Duration {
        Duration::from_millis(self.acquisition_timeout_ms)
    }

    /// Health sweep period as a duration
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Check the bounds
    ///
    /// # Errors
    ///
    /// Returns `InvalidBounds` if `max_size` is zero or below `min_size`
    pub fn validate(&self) -> PoolResult<()> {
        check_bounds(self.min_size, self.max_size)
    }
}

pub(crate) fn check_bounds(min: usize, max: usize) -> PoolResult<()> {
    if max == 0 || min > max {
        return Err(PoolError::InvalidBounds { min, max });
    }
    Ok(())
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            kind: ResourceKind::SandboxRuntime,
            min_size: 0,
            max_size: 10,
            creation_timeout_ms: 5_000,
            acquisition_timeout_ms: 10_000,
            health_check_interval_ms: 30_000,
            max_consecutive_failures: 3,
            reset_on_release: true,
            backpressure: BackpressureController::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::new("conns", ResourceKind::Connection);
        assert_eq!(config.name, "conns");
        assert_eq!(config.max_consecutive_failures, 3);
        assert_eq!(config.acquisition_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_bounds() {
        let config = PoolConfig::default().with_bounds(5, 2);
        assert_eq!(config.validate(), Err(PoolError::InvalidBounds { min: 5, max: 2 }));
        assert!(PoolConfig::default().with_bounds(0, 0).validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let config: PoolConfig = serde_json::from_str(r#"{"name": "x", "max_size": 4}"#).unwrap();
        assert_eq!(config.max_size, 4);
        assert_eq!(config.creation_timeout_ms, 5_000);
    }
}
