//! Optimizer configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How runtime pools are warmed ahead of demand
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupStrategy {
    /// Warm when hot heatmap patterns are waiting and few runtimes are ready
    #[default]
    Predictive,
    /// Keep `min_ready` runtimes ready at all times
    Eager,
    /// Only create runtimes on demand
    Lazy,
}

/// Runtime pool optimizer tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Runtimes per new pool, lower bound
    pub min_runtimes: usize,
    /// Runtimes per new pool, upper bound
    pub max_runtimes: usize,
    /// Utilization above which a pool grows
    pub scale_up_threshold: f64,
    /// Utilization below which a pool shrinks
    pub scale_down_threshold: f64,
    /// Runtimes added per scale-up
    pub scale_up_step: usize,
    /// Runtimes removed per scale-down
    pub scale_down_step: usize,
    /// Warm-up behavior
    pub warmup: WarmupStrategy,
    /// Ready runtimes below which predictive warm-up kicks in
    pub min_ready: usize,
    /// Heatmap hotness that counts as hot
    pub hot_pattern_threshold: f64,
    /// Success rate below which runtimes are replaced
    pub rebalance_threshold: f64,
    /// Period of the optimization loop
    pub interval_ms: u64,
    /// Optimization records kept
    pub history: usize,
}

impl OptimizerConfig {
    /// Optimization loop period
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Apply the fields set in `patch`
    pub fn apply(&mut self, patch: &OptimizerConfigPatch) {
        if let Some(v) = patch.scale_up_threshold {
            self.scale_up_threshold = v.clamp(0.0, 1.0);
        }
        if let Some(v) = patch.scale_down_threshold {
            self.scale_down_threshold = v.clamp(0.0, 1.0);
        }
        if let Some(v) = patch.warmup {
            self.warmup = v;
        }
        if let Some(v) = patch.min_ready {
            self.min_ready = v;
        }
        if let Some(v) = patch.rebalance_threshold {
            self.rebalance_threshold = v.clamp(0.0, 1.0);
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            min_runtimes: 1,
            max_runtimes: 10,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.2,
            scale_up_step: 2,
            scale_down_step: 1,
            warmup: WarmupStrategy::Predictive,
            min_ready: 3,
            hot_pattern_threshold: 70.0,
            rebalance_threshold: 0.8,
            interval_ms: 30_000,
            history: 512,
        }
    }
}

/// Partial update for a live optimizer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfigPatch {
    /// New scale-up threshold
    pub scale_up_threshold: Option<f64>,
    /// New scale-down threshold
    pub scale_down_threshold: Option<f64>,
    /// New warm-up strategy
    pub warmup: Option<WarmupStrategy>,
    /// New ready floor
    pub min_ready: Option<usize>,
    /// New rebalance threshold
    pub rebalance_threshold: Option<f64>,
}

/// Predictive optimizer tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictiveConfig {
    /// Slot length in minutes
    pub slot_minutes: i64,
    /// How far ahead predictions reach, in minutes
    pub horizon_minutes: i64,
    /// Slots starting within this many minutes get recommendations
    pub near_term_minutes: i64,
    /// Minimum prediction confidence for a recommendation
    pub min_confidence: f64,
    /// Confidence of a slot with no matching patterns
    pub confidence_floor: f64,
    /// Observations at which a pattern reaches full confidence
    pub confidence_saturation: f64,
    /// Extra runtimes that justify scaling
    pub min_extra_runtimes: usize,
    /// Cache entries that justify warming
    pub min_cache_entries: usize,
    /// Minutes before the slot a recommendation runs
    pub lead_minutes: i64,
    /// Recommendations applied at once
    pub max_concurrent_executions: usize,
    /// Smoothing factor for pattern averages
    pub ema_alpha: f64,
    /// Period of the prediction loop
    pub prediction_interval_ms: u64,
    /// Period of the recommendation scheduler
    pub scheduler_interval_ms: u64,
}

impl PredictiveConfig {
    /// Prediction loop period
    #[must_use]
    pub fn prediction_interval(&self) -> Duration {
        Duration::from_millis(self.prediction_interval_ms)
    }

    /// Scheduler loop period
    #[must_use]
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_interval_ms)
    }

    /// Apply the fields set in `patch`
    pub fn apply(&mut self, patch: &PredictiveConfigPatch) {
        if let Some(v) = patch.horizon_minutes {
            self.horizon_minutes = v.max(self.slot_minutes);
        }
        if let Some(v) = patch.min_confidence {
            self.min_confidence = v.clamp(0.0, 1.0);
        }
        if let Some(v) = patch.max_concurrent_executions {
            self.max_concurrent_executions = v.max(1);
        }
        if let Some(v) = patch.min_extra_runtimes {
            self.min_extra_runtimes = v;
        }
    }
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            slot_minutes: 5,
            horizon_minutes: 60,
            near_term_minutes: 30,
            min_confidence: 0.7,
            confidence_floor: 0.3,
            confidence_saturation: 20.0,
            min_extra_runtimes: 5,
            min_cache_entries: 10,
            lead_minutes: 3,
            max_concurrent_executions: 3,
            ema_alpha: qflow_core::DEFAULT_EMA_ALPHA,
            prediction_interval_ms: 5 * 60 * 1000,
            scheduler_interval_ms: 30_000,
        }
    }
}

/// Partial update for a live predictive optimizer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictiveConfigPatch {
    /// New horizon
    pub horizon_minutes: Option<i64>,
    /// New confidence floor for recommendations
    pub min_confidence: Option<f64>,
    /// New execution bound
    pub max_concurrent_executions: Option<usize>,
    /// New scaling trigger
    pub min_extra_runtimes: Option<usize>,
}
