//! Engine and service configuration.

use crate::retry::RetryPolicy;
use qflow_heatmap::HeatmapConfig;
use qflow_lazy::LazyConfig;
use qflow_optimize::{OptimizerConfig, PredictiveConfig};
use qflow_wasm::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a failed step does to the rest of the flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureStrategy {
    /// Abort the remaining groups and return an error
    FailFast,
    /// Record the error, cancel dependents, keep going
    #[default]
    ContinueOnError,
    /// Run failed steps once more after their group, then continue
    RetryFailed,
}

/// Parallel execution engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Steps running at once within a group
    pub max_concurrent_steps: usize,
    /// Per-step retry policy
    pub retry: RetryPolicy,
    /// Reaction to failed steps
    pub failure_strategy: FailureStrategy,
    /// Split groups larger than this
    pub max_group_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: 10,
            retry: RetryPolicy::default(),
            failure_strategy: FailureStrategy::default(),
            max_group_size: None,
        }
    }
}

impl EngineConfig {
    /// Apply the fields set in `patch`
    pub fn apply(&mut self, patch: &EngineConfigPatch) {
        if let Some(v) = patch.max_concurrent_steps {
            self.max_concurrent_steps = v.max(1);
        }
        if let Some(v) = patch.retry {
            self.retry = v;
        }
        if let Some(v) = patch.failure_strategy {
            self.failure_strategy = v;
        }
    }
}

/// Hot-reloadable subset of [`EngineConfig`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfigPatch {
    /// New concurrency bound
    pub max_concurrent_steps: Option<usize>,
    /// New retry policy
    pub retry: Option<RetryPolicy>,
    /// New failure strategy
    pub failure_strategy: Option<FailureStrategy>,
}

/// Everything the service facade needs, loadable from one JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QflowConfig {
    /// Execution engine
    pub engine: EngineConfig,
    /// Sandbox limits
    pub sandbox: SandboxConfig,
    /// Runtime pool optimizer
    pub optimizer: OptimizerConfig,
    /// Predictive optimizer
    pub predictive: PredictiveConfig,
    /// Validation heatmap
    pub heatmap: HeatmapConfig,
    /// Lazy component loading
    pub lazy: LazyConfig,
    /// Event bus buffer
    pub event_capacity: usize,
    /// Policy version recorded with heatmap patterns
    pub policy_version: String,
    /// Period of the pool health sweep
    pub health_check_interval_ms: u64,
    /// Grace period for in-use resources on shutdown
    pub drain_timeout_ms: u64,
}

impl Default for QflowConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            sandbox: SandboxConfig::default(),
            optimizer: OptimizerConfig::default(),
            predictive: PredictiveConfig::default(),
            heatmap: HeatmapConfig::default(),
            lazy: LazyConfig::default(),
            event_capacity: qflow_events::EventBus::DEFAULT_CAPACITY,
            policy_version: "1".to_string(),
            health_check_interval_ms: 30_000,
            drain_timeout_ms: 5_000,
        }
    }
}

impl QflowConfig {
    /// Parse a configuration file's contents
    ///
    /// # Errors
    ///
    /// Returns the decoder error for malformed JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Health sweep period
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Shutdown grace period
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file() {
        let config = QflowConfig::from_json(
            r#"{"engine": {"failure_strategy": "fail-fast", "max_concurrent_steps": 4}, "lazy": {"max_cache_size": 1024}}"#,
        )
        .unwrap();
        assert_eq!(config.engine.failure_strategy, FailureStrategy::FailFast);
        assert_eq!(config.engine.max_concurrent_steps, 4);
        assert_eq!(config.engine.retry, RetryPolicy::default());
        assert_eq!(config.lazy.max_cache_size, 1024);
        assert_eq!(config.optimizer, OptimizerConfig::default());
    }

    #[test]
    fn test_engine_patch() {
        let mut config = EngineConfig::default();
        config.apply(&EngineConfigPatch {
            max_concurrent_steps: Some(0),
            failure_strategy: Some(FailureStrategy::RetryFailed),
            ..EngineConfigPatch::default()
        });
        assert_eq!(config.max_concurrent_steps, 1);
        assert_eq!(config.failure_strategy, FailureStrategy::RetryFailed);
    }
}
