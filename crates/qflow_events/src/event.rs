//! Event types published on the bus.
//!
//! Every event carries a topic, the component that emitted it, a timestamp
//! and a JSON payload. Payloads are free-form so subscribers can evolve
//! independently of the emitters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// An execution group began running
    GroupStarted,
    /// Every step in a group finished
    GroupCompleted,
    /// At least one step in a group failed
    GroupFailed,
    /// A step attempt began
    StepStarted,
    /// A step finished successfully
    StepCompleted,
    /// A step exhausted its attempts
    StepFailed,
    /// A step attempt failed and will be retried
    StepRetried,
    /// A step was cancelled because a dependency failed
    StepCancelled,
    /// A pooled resource was created
    ResourceCreated,
    /// A pooled resource was destroyed
    ResourceDestroyed,
    /// A pooled resource was handed out
    ResourceAcquired,
    /// A pooled resource was returned
    ResourceReleased,
    /// A pool was registered
    PoolCreated,
    /// A pool's bounds changed
    PoolResized,
    /// Resources were created ahead of demand
    PoolPrewarmed,
    /// A validation usage pattern was recorded
    PatternRecorded,
    /// A load prediction was generated
    PredictionGenerated,
    /// An optimization recommendation was scheduled
    RecommendationScheduled,
    /// An optimization recommendation was executed
    RecommendationExecuted,
    /// An optimization recommendation failed
    RecommendationFailed,
    /// A pre-warming job finished
    PrewarmJobCompleted,
    /// A pre-warming job failed
    PrewarmJobFailed,
    /// A lazily loaded component entered the cache
    ComponentLoaded,
    /// A cached component was evicted
    ComponentEvicted,
}

impl Topic {
    /// Stable topic name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GroupStarted => "group.started",
            Self::GroupCompleted => "group.completed",
            Self::GroupFailed => "group.failed",
            Self::StepStarted => "step.started",
            Self::StepCompleted => "step.completed",
            Self::StepFailed => "step.failed",
            Self::StepRetried => "step.retried",
            Self::StepCancelled => "step.cancelled",
            Self::ResourceCreated => "resource.created",
            Self::ResourceDestroyed => "resource.destroyed",
            Self::ResourceAcquired => "resource.acquired",
            Self::ResourceReleased => "resource.released",
            Self::PoolCreated => "pool.created",
            Self::PoolResized => "pool.resized",
            Self::PoolPrewarmed => "pool.prewarmed",
            Self::PatternRecorded => "heatmap.pattern_recorded",
            Self::PredictionGenerated => "predictive.prediction_generated",
            Self::RecommendationScheduled => "predictive.recommendation_scheduled",
            Self::RecommendationExecuted => "predictive.recommendation_executed",
            Self::RecommendationFailed => "predictive.recommendation_failed",
            Self::PrewarmJobCompleted => "heatmap.prewarm_completed",
            Self::PrewarmJobFailed => "heatmap.prewarm_failed",
            Self::ComponentLoaded => "lazy.component_loaded",
            Self::ComponentEvicted => "lazy.component_evicted",
        }
    }

    /// Whether the topic reports a failure
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            Self::GroupFailed
                | Self::StepFailed
                | Self::RecommendationFailed
                | Self::PrewarmJobFailed
        )
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Qflow event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// What happened
    pub topic: Topic,
    /// Component that emitted the event
    pub source: String,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Event details
    pub payload: serde_json::Value,
}

impl Event {
    /// Create an event stamped with the current time
    pub fn new(topic: Topic, source: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic,
            source: source.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Override the timestamp
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Read a string field from the payload
    #[must_use]
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_creation() {
        let event = Event::new(Topic::StepStarted, "engine", json!({"step": "fetch"}));
        assert_eq!(event.topic, Topic::StepStarted);
        assert_eq!(event.source, "engine");
        assert_eq!(event.field_str("step"), Some("fetch"));
        assert_eq!(event.field_str("missing"), None);
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::GroupCompleted.as_str(), "group.completed");
        assert_eq!(Topic::PoolPrewarmed.to_string(), "pool.prewarmed");
        assert!(Topic::StepFailed.is_failure());
        assert!(!Topic::StepCompleted.is_failure());
    }

    #[test]
    fn test_event_serializes_topic_snake_case() {
        let event = Event::new(Topic::ResourceAcquired, "pool", json!({}));
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["topic"], "resource_acquired");
    }
}
