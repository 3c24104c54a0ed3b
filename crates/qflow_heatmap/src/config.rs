//! Heatmap configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Heatmap tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapConfig {
    /// Hotness at or above which an entry is pre-warmed
    pub hotness_threshold: f64,
    /// Expected benefit an entry must exceed to be pre-warmed
    pub min_expected_benefit: f64,
    /// Pre-warming jobs run at once
    pub prewarming_batch_size: usize,
    /// Hotness multiplier per idle day
    pub decay_factor: f64,
    /// Idle days before an entry and its pattern are purged
    pub retention_days: i64,
    /// Hours over which the recency score falls from 100 to 0
    pub recency_window_hours: f64,
    /// Frequency score per recorded use, capped at 100
    pub frequency_score_multiplier: f64,
    /// Smoothing factor for pattern averages
    pub ema_alpha: f64,
    /// Period of the decay loop
    pub decay_interval_ms: u64,
    /// Period of the analysis loop
    pub analysis_interval_ms: u64,
    /// Runtimes a job asks for
    pub prewarm_runtimes: usize,
    /// Cache entries a job asks for
    pub prewarm_cache_entries: usize,
    /// Connections a job asks for
    pub prewarm_connections: usize,
    /// Finished jobs kept for inspection
    pub job_history: usize,
}

impl HeatmapConfig {
    /// Decay loop period
    #[must_use]
    pub fn decay_interval(&self) -> Duration {
        Duration::from_millis(self.decay_interval_ms)
    }

    /// Analysis loop period
    #[must_use]
    pub fn analysis_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_interval_ms)
    }

    /// Apply the fields set in `patch`
    pub fn apply(&mut self, patch: &HeatmapConfigPatch) {
        if let Some(v) = patch.hotness_threshold {
            self.hotness_threshold = v.clamp(0.0, 100.0);
        }
        if let Some(v) = patch.min_expected_benefit {
            self.min_expected_benefit = v;
        }
        if let Some(v) = patch.prewarming_batch_size {
            self.prewarming_batch_size = v.max(1);
        }
        if let Some(v) = patch.decay_factor {
            self.decay_factor = v.clamp(0.0, 1.0);
        }
        if let Some(v) = patch.retention_days {
            self.retention_days = v.max(1);
        }
        if let Some(v) = patch.frequency_score_multiplier {
            self.frequency_score_multiplier = v.max(0.0);
        }
    }
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            hotness_threshold: 70.0,
            min_expected_benefit: 10.0,
            prewarming_batch_size: 5,
            decay_factor: 0.9,
            retention_days: 7,
            recency_window_hours: 20.0,
            frequency_score_multiplier: 2.0,
            ema_alpha: qflow_core::DEFAULT_EMA_ALPHA,
            decay_interval_ms: 60 * 60 * 1000,
            analysis_interval_ms: 5 * 60 * 1000,
            prewarm_runtimes: 2,
            prewarm_cache_entries: 10,
            prewarm_connections: 1,
            job_history: 256,
        }
    }
}

/// Partial update for a live heatmap
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapConfigPatch {
    /// New hotness threshold
    pub hotness_threshold: Option<f64>,
    /// New benefit floor
    pub min_expected_benefit: Option<f64>,
    /// New batch size
    pub prewarming_batch_size: Option<usize>,
    /// New decay factor
    pub decay_factor: Option<f64>,
    /// New retention
    pub retention_days: Option<i64>,
    /// New frequency multiplier
    pub frequency_score_multiplier: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_clamps() {
        let mut config = HeatmapConfig::default();
        config.apply(&HeatmapConfigPatch {
            hotness_threshold: Some(150.0),
            prewarming_batch_size: Some(0),
            ..HeatmapConfigPatch::default()
        });
        assert_eq!(config.hotness_threshold, 100.0);
        assert_eq!(config.prewarming_batch_size, 1);
        assert_eq!(config.decay_factor, 0.9);
    }

    #[test]
    fn test_default_frequency_multiplier() {
        assert_eq!(HeatmapConfig::default().frequency_score_multiplier, 2.0);
    }
}
