//! Execution patterns, forecasts and recommendations.

use chrono::{DateTime, Utc};
use qflow_core::{PredictionId, RecommendationId};
use serde::{Deserialize, Serialize};

/// One finished flow execution, as fed to the predictive optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Flow type
    pub flow_type: String,
    /// When the execution ran
    pub at: DateTime<Utc>,
    /// Wall time in milliseconds
    pub latency_ms: f64,
    /// Runtimes the execution used
    pub resource_usage: f64,
    /// Validation layers the flow passed through
    pub validation_layers: Vec<String>,
    /// Whether the execution succeeded
    pub success: bool,
}

/// Identity of an execution pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionPatternKey {
    /// Flow type
    pub flow_type: String,
    /// Hour of day (UTC, 0 - 23)
    pub hour: u32,
    /// Validation layers, sorted and deduplicated
    pub layers: Vec<String>,
}

/// Rolling statistics for a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPattern {
    /// Pattern identity
    pub key: ExecutionPatternKey,
    /// Executions observed
    pub frequency: u64,
    /// Smoothed latency in milliseconds
    pub avg_latency_ms: f64,
    /// Smoothed runtime usage
    pub avg_resource_usage: f64,
    /// Smoothed success rate
    pub success_rate: f64,
    /// Trust in the pattern (0.0 - 1.0), grows with frequency
    pub confidence: f64,
    /// Latest observation
    pub last_seen: DateTime<Utc>,
}

impl ExecutionPattern {
    /// `frequency * confidence`
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.frequency as f64 * self.confidence
    }
}

/// The heuristic estimator behind predictions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictiveModel {
    /// Executions observed
    pub samples: u64,
    /// Recommendations whose outcome was measured
    pub evaluations: u64,
    /// Smoothed agreement between expected and actual impact (0.0 - 1.0)
    pub accuracy: f64,
    /// Last time the model changed
    pub updated_at: Option<DateTime<Utc>>,
}

impl PredictiveModel {
    /// Fold one measured outcome into the accuracy
    pub fn evaluate(&mut self, expected: f64, actual: f64, alpha: f64, now: DateTime<Utc>) {
        let scale = expected.abs().max(actual.abs()).max(1.0);
        let score = (1.0 - (expected - actual).abs() / scale).clamp(0.0, 1.0);
        self.accuracy = if self.evaluations == 0 {
            score
        } else {
            qflow_core::ema(self.accuracy, score, alpha)
        };
        self.evaluations += 1;
        self.updated_at = Some(now);
    }
}

/// Load forecast for one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationPrediction {
    /// Prediction id
    pub id: PredictionId,
    /// Slot start
    pub slot_start: DateTime<Utc>,
    /// Slot end
    pub slot_end: DateTime<Utc>,
    /// Expected executions, weighted by confidence
    pub expected_load: f64,
    /// Runtimes the slot is expected to need
    pub required_runtimes: f64,
    /// Cache entries the slot is expected to need
    pub required_cache_entries: f64,
    /// Trust in the forecast (0.0 - 1.0)
    pub confidence: f64,
    /// Patterns that contributed
    pub patterns: usize,
    /// Generation time
    pub generated_at: DateTime<Utc>,
}

/// What a recommendation asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum RecommendedAction {
    /// Add runtimes
    ScaleRuntimes {
        /// Runtimes to add
        count: usize,
    },
    /// Preload cache entries
    WarmCache {
        /// Entries to load
        entries: usize,
    },
}

impl RecommendedAction {
    /// Units the action asks for
    #[must_use]
    pub const fn amount(&self) -> usize {
        match self {
            Self::ScaleRuntimes { count } => *count,
            Self::WarmCache { entries } => *entries,
        }
    }

    pub(crate) const fn same_kind(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::ScaleRuntimes { .. }, Self::ScaleRuntimes { .. }) | (Self::WarmCache { .. }, Self::WarmCache { .. })
        )
    }
}

/// Recommendation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    /// Waiting for `execute_at`
    Scheduled,
    /// Being applied
    Executing,
    /// Applied
    Executed,
    /// Application failed; not retried
    Failed,
    /// Validity window passed before it ran
    Expired,
}

impl RecommendationStatus {
    /// Scheduled or executing
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Scheduled | Self::Executing)
    }
}

/// An actionable, scheduled recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    /// Recommendation id
    pub id: RecommendationId,
    /// Forecast it came from
    pub prediction: PredictionId,
    /// Requested action
    pub action: RecommendedAction,
    /// Units the action is expected to add
    pub expected_impact: f64,
    /// How to undo the action by hand
    pub rollback: String,
    /// Forecast confidence
    pub confidence: f64,
    /// Earliest run time
    pub execute_at: DateTime<Utc>,
    /// Latest run time
    pub valid_until: DateTime<Utc>,
    /// Lifecycle state
    pub status: RecommendationStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Record of an applied (or failed) recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationExecution {
    /// Recommendation applied
    pub recommendation: RecommendationId,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
    /// Expected units
    pub expected_impact: f64,
    /// Units actually added
    pub actual_impact: Option<f64>,
    /// Failure reason
    pub error: Option<String>,
}
