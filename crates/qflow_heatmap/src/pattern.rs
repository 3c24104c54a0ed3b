//! Validation patterns and heatmap entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters of the input hash kept in a pattern key
pub const INPUT_PREFIX_LEN: usize = 16;

/// Identity of a validation pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternKey {
    /// Validation layers, sorted and deduplicated
    pub layers: Vec<String>,
    /// Leading characters of the input hash
    pub input_prefix: String,
    /// Policy version the validation ran under
    pub policy_version: String,
}

impl PatternKey {
    /// Build a key. Layer order does not matter; the input hash is truncated.
    pub fn new<I, S>(layers: I, input_hash: &str, policy_version: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut layers: Vec<String> = layers.into_iter().map(Into::into).collect();
        layers.sort();
        layers.dedup();
        Self {
            layers,
            input_prefix: input_hash.chars().take(INPUT_PREFIX_LEN).collect(),
            policy_version: policy_version.into(),
        }
    }

    /// Whether the pattern covers `layer`
    #[must_use]
    pub fn has_layer(&self, layer: &str) -> bool {
        self.layers.binary_search_by(|l| l.as_str().cmp(layer)).is_ok()
    }
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.layers.join(","), self.input_prefix, self.policy_version)
    }
}

/// Rolling statistics for one pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationPattern {
    /// Pattern identity
    pub key: PatternKey,
    /// Times recorded
    pub frequency: u64,
    /// Smoothed latency in milliseconds
    pub avg_latency_ms: f64,
    /// Smoothed success rate (0.0 - 1.0)
    pub success_rate: f64,
    /// Smoothed resource usage (caller-defined units)
    pub avg_resource_usage: f64,
    /// First sighting
    pub first_seen: DateTime<Utc>,
    /// Latest sighting
    pub last_seen: DateTime<Utc>,
}

/// Heat of one pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapEntry {
    /// Pattern identity
    pub key: PatternKey,
    /// Current hotness (0 - 100)
    pub hotness: f64,
    /// Hotness at the last access, before decay
    pub base_hotness: f64,
    /// Whether a pre-warming job has completed for the pattern
    pub prewarmed: bool,
    /// Estimated milliseconds saved by pre-warming
    pub expected_benefit: f64,
    /// Latest access
    pub last_access: DateTime<Utc>,
}

/// Inputs to the hotness formula
#[derive(Debug, Clone, Copy)]
pub(crate) struct Scoring {
    pub frequency_multiplier: f64,
    pub recency_window_hours: f64,
}

impl Scoring {
    /// `min(100, frequency * multiplier)`
    pub fn frequency_score(&self, frequency: u64) -> f64 {
        (frequency as f64 * self.frequency_multiplier).min(100.0)
    }

    /// 100 at zero idle time, falling linearly to 0 over the window
    pub fn recency_score(&self, idle_hours: f64) -> f64 {
        if self.recency_window_hours <= 0.0 {
            return 0.0;
        }
        (100.0 * (1.0 - idle_hours.max(0.0) / self.recency_window_hours)).clamp(0.0, 100.0)
    }

    pub fn hotness(&self, frequency: u64, idle_hours: f64, success: bool) -> f64 {
        let performance = if success { 100.0 } else { 50.0 };
        let raw =
            0.5 * self.frequency_score(frequency) + 0.3 * self.recency_score(idle_hours) + 0.2 * performance;
        raw.clamp(0.0, 100.0)
    }
}

/// `avg_latency * 0.3 * min(10, frequency / 10) * success_rate`
#[must_use]
pub fn expected_benefit(pattern: &ValidationPattern) -> f64 {
    let reuse = (pattern.frequency as f64 / 10.0).min(10.0);
    pattern.avg_latency_ms * 0.3 * reuse * pattern.success_rate
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SCORING: Scoring = Scoring {
        frequency_multiplier: 2.0,
        recency_window_hours: 20.0,
    };

    #[test]
    fn test_key_normalizes_layers() {
        let a = PatternKey::new(["schema", "auth", "schema"], "abcdef0123456789ffff", "v1");
        let b = PatternKey::new(["auth", "schema"], "abcdef0123456789eeee", "v1");
        assert_eq!(a, b);
        assert_eq!(a.input_prefix.len(), INPUT_PREFIX_LEN);
        assert!(a.has_layer("auth"));
        assert!(!a.has_layer("rate"));
        assert_eq!(a.to_string(), "auth,schema|abcdef0123456789|v1");
    }

    #[test]
    fn test_hotness_components() {
        assert_eq!(SCORING.frequency_score(10), 20.0);
        assert_eq!(SCORING.frequency_score(50), 100.0);
        assert_eq!(SCORING.frequency_score(500), 100.0);
        assert_eq!(SCORING.hotness(50, 0.0, true), 100.0);
        assert_eq!(SCORING.hotness(1, 0.0, true), 51.0);
        assert_eq!(SCORING.hotness(50, 20.0, false), 60.0);
        assert_eq!(SCORING.recency_score(10.0), 50.0);
        assert_eq!(SCORING.recency_score(40.0), 0.0);
    }

    proptest! {
        #[test]
        fn prop_hotness_in_range(freq in 0u64..10_000, idle in 0.0f64..1_000.0, ok: bool) {
            let h = SCORING.hotness(freq, idle, ok);
            prop_assert!((0.0..=100.0).contains(&h));
        }
    }
}
