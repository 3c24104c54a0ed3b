//! Predictive optimizer.
//!
//! Learns execution patterns per (flow type, hour of day, layer set), turns
//! them into load forecasts for fixed-length slots ahead of now, and
//! schedules capacity changes a few minutes before a slot that needs them.
//! Scheduled recommendations run through an [`OptimizationTarget`]; the
//! measured impact feeds the model's accuracy.

use crate::config::{PredictiveConfig, PredictiveConfigPatch};
use crate::prediction::{
    ExecutionPattern, ExecutionPatternKey, ExecutionRecord, OptimizationExecution, OptimizationPrediction,
    OptimizationRecommendation, PredictiveModel, RecommendationStatus, RecommendedAction,
};
use crate::target::{Capacity, OptimizationTarget};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use qflow_core::{PredictionId, RecommendationId, SharedClock, ema};
use qflow_events::{EventBus, PeriodicTask, Topic};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SOURCE: &str = "predictive-optimizer";
const FINISHED_HISTORY: usize = 256;

#[derive(Debug, Default)]
struct State {
    patterns: HashMap<ExecutionPatternKey, ExecutionPattern>,
    predictions: Vec<OptimizationPrediction>,
    recommendations: IndexMap<RecommendationId, OptimizationRecommendation>,
    executions: IndexMap<RecommendationId, OptimizationExecution>,
    model: PredictiveModel,
}

impl State {
    fn prune_finished(&mut self) {
        let finished = self
            .recommendations
            .values()
            .filter(|r| !r.status.is_active())
            .count();
        let mut excess = finished.saturating_sub(FINISHED_HISTORY);
        if excess > 0 {
            self.recommendations.retain(|_, r| {
                if excess > 0 && !r.status.is_active() {
                    excess -= 1;
                    return false;
                }
                true
            });
        }
        while self.executions.len() > FINISHED_HISTORY {
            self.executions.shift_remove_index(0);
        }
    }
}

/// Forecasts load and applies capacity changes ahead of it
pub struct PredictiveOptimizer {
    clock: SharedClock,
    config: RwLock<PredictiveConfig>,
    state: Mutex<State>,
    target: Arc<dyn OptimizationTarget>,
    events: Option<EventBus>,
}

impl std::fmt::Debug for PredictiveOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PredictiveOptimizer")
            .field("patterns", &state.patterns.len())
            .field("recommendations", &state.recommendations.len())
            .finish_non_exhaustive()
    }
}

impl PredictiveOptimizer {
    /// Create an optimizer that applies recommendations to `target`
    pub fn new(config: PredictiveConfig, clock: SharedClock, target: Arc<dyn OptimizationTarget>) -> Self {
        Self {
            clock,
            config: RwLock::new(config),
            state: Mutex::new(State::default()),
            target,
            events: None,
        }
    }

    /// Report predictions and recommendations to `events`
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> PredictiveConfig {
        self.config.read().clone()
    }

    /// Apply a configuration patch
    pub fn update_config(&self, patch: &PredictiveConfigPatch) {
        self.config.write().apply(patch);
        info!(?patch, "predictive config updated");
    }

    fn emit(&self, topic: Topic, payload: serde_json::Value) {
        if let Some(bus) = &self.events {
            bus.emit(topic, SOURCE, payload);
        }
    }

    /// Fold one finished execution into its pattern
    pub fn record_execution(&self, record: &ExecutionRecord) -> ExecutionPatternKey {
        let config = self.config();
        let mut layers = record.validation_layers.clone();
        layers.sort();
        layers.dedup();
        let key = ExecutionPatternKey {
            flow_type: record.flow_type.clone(),
            hour: record.at.hour(),
            layers,
        };
        let success = if record.success { 1.0 } else { 0.0 };

        let (frequency, confidence) = {
            let mut state = self.state.lock();
            state.model.samples += 1;
            state.model.updated_at = Some(record.at);
            let pattern = state.patterns.entry(key.clone()).or_insert_with(|| ExecutionPattern {
                key: key.clone(),
                frequency: 0,
                avg_latency_ms: record.latency_ms,
                avg_resource_usage: record.resource_usage,
                success_rate: success,
                confidence: 0.0,
                last_seen: record.at,
            });
            if pattern.frequency > 0 {
                pattern.avg_latency_ms = ema(pattern.avg_latency_ms, record.latency_ms, config.ema_alpha);
                pattern.avg_resource_usage = ema(pattern.avg_resource_usage, record.resource_usage, config.ema_alpha);
                pattern.success_rate = ema(pattern.success_rate, success, config.ema_alpha);
            }
            pattern.frequency += 1;
            pattern.confidence = (pattern.frequency as f64 / config.confidence_saturation.max(1.0)).min(1.0);
            pattern.last_seen = pattern.last_seen.max(record.at);
            (pattern.frequency, pattern.confidence)
        };

        debug!(flow = %key.flow_type, hour = key.hour, frequency, "execution pattern recorded");
        self.emit(
            Topic::PatternRecorded,
            json!({
                "flow_type": key.flow_type,
                "hour": key.hour,
                "layers": key.layers,
                "frequency": frequency,
                "confidence": confidence,
            }),
        );
        key
    }

    /// Forecast every slot between now and the horizon, replacing the last
    /// forecast
    pub fn generate_predictions(&self) -> Vec<OptimizationPrediction> {
        let config = self.config();
        let now = self.clock.now();
        let slot = ChronoDuration::minutes(config.slot_minutes.max(1));
        let slots = (config.horizon_minutes / config.slot_minutes.max(1)).max(1);
        let current = slot_start(now, config.slot_minutes.max(1));

        let mut state = self.state.lock();
        let predictions: Vec<OptimizationPrediction> = (1..=slots)
            .map(|i| {
                let start = current + slot * i as i32;
                forecast(&state.patterns, start, start + slot, now, &config)
            })
            .collect();
        state.predictions = predictions.clone();
        drop(state);

        let confident = predictions
            .iter()
            .filter(|p| p.confidence >= config.min_confidence)
            .count();
        debug!(slots = predictions.len(), confident, "predictions generated");
        self.emit(
            Topic::PredictionGenerated,
            json!({
                "slots": predictions.len(),
                "confident": confident,
                "peak_load": predictions.iter().map(|p| p.expected_load).fold(0.0, f64::max),
            }),
        );
        predictions
    }

    /// Turn near-term, confident forecasts into scheduled recommendations.
    ///
    /// At most one active recommendation per action kind exists at a time;
    /// the next one is derived from the capacity that is ready once the
    /// previous has run.
    pub async fn generate_recommendations(&self) -> Vec<OptimizationRecommendation> {
        let needs_forecast = self.state.lock().predictions.is_empty();
        if needs_forecast {
            self.generate_predictions();
        }
        let capacity = self.target.capacity().await;
        let config = self.config();
        let now = self.clock.now();
        let near_term = now + ChronoDuration::minutes(config.near_term_minutes);
        let lead = ChronoDuration::minutes(config.lead_minutes);

        let mut created = Vec::new();
        {
            let mut state = self.state.lock();
            let candidates: Vec<OptimizationPrediction> = state
                .predictions
                .iter()
                .filter(|p| p.confidence >= config.min_confidence && p.slot_start > now && p.slot_start <= near_term)
                .cloned()
                .collect();

            for prediction in candidates {
                for action in actions_for(&prediction, capacity, &config) {
                    let taken = state
                        .recommendations
                        .values()
                        .any(|r| r.status.is_active() && r.action.same_kind(&action));
                    if taken {
                        continue;
                    }
                    let recommendation = OptimizationRecommendation {
                        id: RecommendationId::new(),
                        prediction: prediction.id,
                        action,
                        expected_impact: action.amount() as f64,
                        rollback: rollback_plan(action, prediction.slot_end),
                        confidence: prediction.confidence,
                        execute_at: (prediction.slot_start - lead).max(now),
                        valid_until: prediction.slot_end,
                        status: RecommendationStatus::Scheduled,
                        created_at: now,
                    };
                    state.recommendations.insert(recommendation.id, recommendation.clone());
                    created.push(recommendation);
                }
            }
            state.prune_finished();
        }

        for recommendation in &created {
            info!(
                id = %recommendation.id,
                action = ?recommendation.action,
                execute_at = %recommendation.execute_at,
                "recommendation scheduled"
            );
            self.emit(
                Topic::RecommendationScheduled,
                json!({
                    "id": recommendation.id,
                    "action": recommendation.action,
                    "execute_at": recommendation.execute_at,
                    "valid_until": recommendation.valid_until,
                    "confidence": recommendation.confidence,
                }),
            );
        }
        created
    }

    /// Mark scheduled recommendations whose window has passed as expired
    pub fn expire(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let mut expired = 0;
        for recommendation in state.recommendations.values_mut() {
            if recommendation.status == RecommendationStatus::Scheduled && recommendation.valid_until <= now {
                recommendation.status = RecommendationStatus::Expired;
                expired += 1;
            }
        }
        if expired > 0 {
            debug!(expired, "recommendations expired");
        }
        expired
    }

    /// Apply due recommendations, at most `max_concurrent_executions` at a
    /// time including ones still executing. Returns the executions recorded.
    pub async fn run_due(&self) -> Vec<OptimizationExecution> {
        self.expire();
        let config = self.config();
        let now = self.clock.now();

        let due: Vec<OptimizationRecommendation> = {
            let mut state = self.state.lock();
            let running = state
                .recommendations
                .values()
                .filter(|r| r.status == RecommendationStatus::Executing)
                .count();
            let room = config.max_concurrent_executions.saturating_sub(running);
            let mut due: Vec<RecommendationId> = state
                .recommendations
                .values()
                .filter(|r| {
                    r.status == RecommendationStatus::Scheduled
                        && r.execute_at <= now
                        && !state.executions.contains_key(&r.id)
                })
                .map(|r| r.id)
                .collect();
            due.truncate(room);
            due.iter()
                .filter_map(|id| {
                    let recommendation = state.recommendations.get_mut(id)?;
                    recommendation.status = RecommendationStatus::Executing;
                    Some(recommendation.clone())
                })
                .collect()
        };
        if due.is_empty() {
            return Vec::new();
        }

        let outcomes = futures::future::join_all(due.iter().map(|r| self.apply(r.action))).await;

        let finished_at = self.clock.now();
        let mut executions = Vec::with_capacity(due.len());
        for (recommendation, outcome) in due.into_iter().zip(outcomes) {
            let execution = OptimizationExecution {
                recommendation: recommendation.id,
                started_at: now,
                finished_at,
                expected_impact: recommendation.expected_impact,
                actual_impact: outcome.as_ref().ok().map(|n| *n as f64),
                error: outcome.as_ref().err().map(ToString::to_string),
            };
            {
                let mut state = self.state.lock();
                let status = if outcome.is_ok() {
                    RecommendationStatus::Executed
                } else {
                    RecommendationStatus::Failed
                };
                if let Some(stored) = state.recommendations.get_mut(&recommendation.id) {
                    stored.status = status;
                }
                if let Some(actual) = execution.actual_impact {
                    state
                        .model
                        .evaluate(execution.expected_impact, actual, config.ema_alpha, finished_at);
                }
                state.executions.insert(recommendation.id, execution.clone());
                state.prune_finished();
            }

            match &outcome {
                Ok(actual) => {
                    info!(id = %recommendation.id, action = ?recommendation.action, actual, "recommendation executed");
                    self.emit(
                        Topic::RecommendationExecuted,
                        json!({
                            "id": recommendation.id,
                            "action": recommendation.action,
                            "expected_impact": recommendation.expected_impact,
                            "actual_impact": actual,
                        }),
                    );
                }
                Err(e) => {
                    warn!(id = %recommendation.id, error = %e, "recommendation failed");
                    self.emit(
                        Topic::RecommendationFailed,
                        json!({ "id": recommendation.id, "action": recommendation.action, "error": e.to_string() }),
                    );
                }
            }
            executions.push(execution);
        }
        executions
    }

    async fn apply(&self, action: RecommendedAction) -> crate::error::OptimizationResult<usize> {
        match action {
            RecommendedAction::ScaleRuntimes { count } => self.target.scale_runtimes(count).await,
            RecommendedAction::WarmCache { entries } => self.target.warm_cache(entries).await,
        }
    }

    /// Learned patterns, most frequent first
    #[must_use]
    pub fn patterns(&self) -> Vec<ExecutionPattern> {
        let mut patterns: Vec<ExecutionPattern> = self.state.lock().patterns.values().cloned().collect();
        patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.key.cmp(&b.key)));
        patterns
    }

    /// Latest forecast
    #[must_use]
    pub fn predictions(&self) -> Vec<OptimizationPrediction> {
        self.state.lock().predictions.clone()
    }

    /// Forecast for a prediction id
    #[must_use]
    pub fn prediction(&self, id: PredictionId) -> Option<OptimizationPrediction> {
        self.state.lock().predictions.iter().find(|p| p.id == id).cloned()
    }

    /// One recommendation
    #[must_use]
    pub fn recommendation(&self, id: RecommendationId) -> Option<OptimizationRecommendation> {
        self.state.lock().recommendations.get(&id).cloned()
    }

    /// Scheduled or executing recommendations, earliest first
    #[must_use]
    pub fn active_recommendations(&self) -> Vec<OptimizationRecommendation> {
        let mut active: Vec<OptimizationRecommendation> = self
            .state
            .lock()
            .recommendations
            .values()
            .filter(|r| r.status.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|r| r.execute_at);
        active
    }

    /// Execution records, oldest first
    #[must_use]
    pub fn executions(&self) -> Vec<OptimizationExecution> {
        self.state.lock().executions.values().cloned().collect()
    }

    /// The model's counters
    #[must_use]
    pub fn model(&self) -> PredictiveModel {
        self.state.lock().model.clone()
    }
}

fn slot_start(now: DateTime<Utc>, slot_minutes: i64) -> DateTime<Utc> {
    let secs = now.timestamp();
    let start = secs - secs.rem_euclid(slot_minutes * 60);
    DateTime::<Utc>::from_timestamp(start, 0).unwrap_or(now)
}

fn forecast(
    patterns: &HashMap<ExecutionPatternKey, ExecutionPattern>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &PredictiveConfig,
) -> OptimizationPrediction {
    let hour = start.hour();
    let matching: Vec<&ExecutionPattern> = patterns.values().filter(|p| p.key.hour == hour).collect();
    let expected_load = matching.iter().map(|p| p.weight()).sum();
    let required_runtimes = matching.iter().map(|p| p.weight() * p.avg_resource_usage).sum();
    let required_cache_entries = matching.iter().map(|p| p.weight() * p.key.layers.len() as f64).sum();
    let confidence = if matching.is_empty() {
        config.confidence_floor
    } else {
        matching.iter().map(|p| p.confidence).sum::<f64>() / matching.len() as f64
    };
    OptimizationPrediction {
        id: PredictionId::new(),
        slot_start: start,
        slot_end: end,
        expected_load,
        required_runtimes,
        required_cache_entries,
        confidence,
        patterns: matching.len(),
        generated_at: now,
    }
}

fn actions_for(prediction: &OptimizationPrediction, capacity: Capacity, config: &PredictiveConfig) -> Vec<RecommendedAction> {
    let mut actions = Vec::new();
    let extra_runtimes = (prediction.required_runtimes.ceil() as usize).saturating_sub(capacity.runtimes);
    if extra_runtimes >= config.min_extra_runtimes && extra_runtimes > 0 {
        actions.push(RecommendedAction::ScaleRuntimes { count: extra_runtimes });
    }
    let entries = (prediction.required_cache_entries.ceil() as usize).saturating_sub(capacity.cache_entries);
    if entries >= config.min_cache_entries && entries > 0 {
        actions.push(RecommendedAction::WarmCache { entries });
    }
    actions
}

fn rollback_plan(action: RecommendedAction, slot_end: DateTime<Utc>) -> String {
    match action {
        RecommendedAction::ScaleRuntimes { count } => {
            format!("cool down {count} idle runtimes after {}", slot_end.to_rfc3339())
        }
        RecommendedAction::WarmCache { entries } => {
            format!("unload {entries} preloaded components after {}", slot_end.to_rfc3339())
        }
    }
}

/// Refreshes forecasts and schedules recommendations
#[derive(Debug, Clone)]
pub struct PredictionTask(pub Arc<PredictiveOptimizer>);

#[async_trait]
impl PeriodicTask for PredictionTask {
    fn name(&self) -> &'static str {
        "predictive-forecast"
    }

    async fn tick(&self) {
        self.0.generate_predictions();
        self.0.generate_recommendations().await;
    }
}

/// Runs due recommendations and expires stale ones
#[derive(Debug, Clone)]
pub struct SchedulerTask(pub Arc<PredictiveOptimizer>);

#[async_trait]
impl PeriodicTask for SchedulerTask {
    fn name(&self) -> &'static str {
        "predictive-scheduler"
    }

    async fn tick(&self) {
        self.0.run_due().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OptimizationError;
    use chrono::TimeZone;
    use qflow_core::ManualClock;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<RecommendedAction>>,
        ready_runtimes: usize,
        fail_scaling: AtomicBool,
        halve: bool,
    }

    #[async_trait]
    impl OptimizationTarget for Recorder {
        async fn capacity(&self) -> Capacity {
            Capacity {
                runtimes: self.ready_runtimes,
                cache_entries: 0,
            }
        }

        async fn scale_runtimes(&self, count: usize) -> Result<usize, OptimizationError> {
            self.calls.lock().push(RecommendedAction::ScaleRuntimes { count });
            if self.fail_scaling.load(Ordering::SeqCst) {
                return Err(OptimizationError::Target("pool at capacity".to_string()));
            }
            Ok(if self.halve { count / 2 } else { count })
        }

        async fn warm_cache(&self, entries: usize) -> Result<usize, OptimizationError> {
            self.calls.lock().push(RecommendedAction::WarmCache { entries });
            Ok(entries)
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, h, m, 0).unwrap()
    }

    fn record(flow: &str, when: DateTime<Utc>) -> ExecutionRecord {
        ExecutionRecord {
            flow_type: flow.to_string(),
            at: when,
            latency_ms: 120.0,
            resource_usage: 1.0,
            validation_layers: vec!["schema".to_string(), "auth".to_string(), "schema".to_string()],
            success: true,
        }
    }

    fn setup(target: Arc<Recorder>, config: PredictiveConfig) -> (Arc<ManualClock>, PredictiveOptimizer) {
        let clock = Arc::new(ManualClock::new(at(9, 50)));
        let optimizer = PredictiveOptimizer::new(config, clock.clone(), target);
        // a day earlier, twenty checkouts between 10:00 and 10:19
        for i in 0..20 {
            optimizer.record_execution(&record("checkout", at(10, i) - ChronoDuration::days(1)));
        }
        (clock, optimizer)
    }

    #[test]
    fn test_patterns_grow_confidence() {
        let clock = Arc::new(ManualClock::new(at(9, 0)));
        let optimizer = PredictiveOptimizer::new(PredictiveConfig::default(), clock, Arc::new(Recorder::default()));
        let key = optimizer.record_execution(&record("checkout", at(10, 0)));
        assert_eq!(key.hour, 10);
        assert_eq!(key.layers, vec!["auth".to_string(), "schema".to_string()]);
        for _ in 0..9 {
            optimizer.record_execution(&ExecutionRecord {
                latency_ms: 220.0,
                ..record("checkout", at(10, 30))
            });
        }
        let patterns = optimizer.patterns();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].frequency, 10);
        assert_eq!(patterns[0].confidence, 0.5);
        assert!(patterns[0].avg_latency_ms > 120.0 && patterns[0].avg_latency_ms < 220.0);
        assert_eq!(optimizer.model().samples, 10);
    }

    #[test]
    fn test_forecast_by_slot() {
        let (_clock, optimizer) = setup(Arc::new(Recorder::default()), PredictiveConfig::default());
        let predictions = optimizer.generate_predictions();
        assert_eq!(predictions.len(), 12);
        assert_eq!(predictions[0].slot_start, at(9, 55));
        assert_eq!(predictions[0].confidence, 0.3);
        assert_eq!(predictions[0].expected_load, 0.0);

        let ten = &predictions[1];
        assert_eq!(ten.slot_start, at(10, 0));
        assert_eq!(ten.slot_end, at(10, 5));
        assert_eq!(ten.expected_load, 20.0);
        assert_eq!(ten.required_runtimes, 20.0);
        assert_eq!(ten.required_cache_entries, 40.0);
        assert_eq!(ten.confidence, 1.0);
        assert_eq!(optimizer.predictions().len(), 12);
    }

    #[tokio::test]
    async fn test_recommendations_run_before_slot() {
        let target = Arc::new(Recorder {
            ready_runtimes: 3,
            ..Recorder::default()
        });
        let (clock, optimizer) = setup(target.clone(), PredictiveConfig::default());

        let created = optimizer.generate_recommendations().await;
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].action, RecommendedAction::ScaleRuntimes { count: 17 });
        assert_eq!(created[0].execute_at, at(9, 57));
        assert_eq!(created[0].valid_until, at(10, 5));
        assert_eq!(created[1].action, RecommendedAction::WarmCache { entries: 40 });
        assert!(created[0].rollback.starts_with("cool down 17 idle runtimes"));

        // one active recommendation per kind
        assert!(optimizer.generate_recommendations().await.is_empty());

        assert!(optimizer.run_due().await.is_empty());
        clock.set(at(9, 57));
        let executions = optimizer.run_due().await;
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0].actual_impact, Some(17.0));
        assert_eq!(target.calls.lock().len(), 2);
        assert!(optimizer.active_recommendations().is_empty());
        assert_eq!(
            optimizer.recommendation(created[0].id).unwrap().status,
            RecommendationStatus::Executed
        );

        // nothing runs twice
        assert!(optimizer.run_due().await.is_empty());
        assert_eq!(optimizer.model().accuracy, 1.0);
        assert_eq!(optimizer.model().evaluations, 2);
    }

    #[tokio::test]
    async fn test_low_confidence_and_far_slots_are_skipped() {
        let clock = Arc::new(ManualClock::new(at(9, 0)));
        let optimizer = PredictiveOptimizer::new(PredictiveConfig::default(), clock, Arc::new(Recorder::default()));
        for i in 0..5 {
            optimizer.record_execution(&ExecutionRecord {
                resource_usage: 4.0,
                ..record("checkout", at(9, 30 + i))
            });
        }
        // confidence 0.25
        assert!(optimizer.generate_recommendations().await.is_empty());

        for i in 0..20 {
            optimizer.record_execution(&record("report", at(9, 40) + ChronoDuration::hours(1) + ChronoDuration::minutes(i)));
        }
        optimizer.generate_predictions();
        // 10:00 is more than 30 minutes away
        assert!(optimizer.generate_recommendations().await.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_not_retried() {
        let target = Arc::new(Recorder::default());
        target.fail_scaling.store(true, Ordering::SeqCst);
        let (clock, optimizer) = setup(target.clone(), PredictiveConfig::default());
        let created = optimizer.generate_recommendations().await;
        clock.set(at(9, 58));

        let executions = optimizer.run_due().await;
        let failed = executions.iter().find(|e| e.recommendation == created[0].id).unwrap();
        assert_eq!(failed.actual_impact, None);
        assert!(failed.error.as_deref().unwrap().contains("pool at capacity"));
        assert_eq!(
            optimizer.recommendation(created[0].id).unwrap().status,
            RecommendationStatus::Failed
        );

        target.fail_scaling.store(false, Ordering::SeqCst);
        assert!(optimizer.run_due().await.is_empty());
        assert_eq!(target.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_bounded_execution_and_expiry() {
        let target = Arc::new(Recorder {
            halve: true,
            ..Recorder::default()
        });
        let config = PredictiveConfig {
            max_concurrent_executions: 1,
            ..PredictiveConfig::default()
        };
        let (clock, optimizer) = setup(target.clone(), config);
        let created = optimizer.generate_recommendations().await;
        assert_eq!(created.len(), 2);
        clock.set(at(9, 57));

        let first = optimizer.run_due().await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].actual_impact, Some(10.0));
        assert_eq!(optimizer.model().accuracy, 0.5);
        assert_eq!(optimizer.active_recommendations().len(), 1);

        clock.set(at(10, 5));
        assert!(optimizer.run_due().await.is_empty());
        assert_eq!(
            optimizer.recommendation(created[1].id).unwrap().status,
            RecommendationStatus::Expired
        );
        assert_eq!(optimizer.executions().len(), 1);
    }

    #[tokio::test]
    async fn test_events() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let clock = Arc::new(ManualClock::new(at(9, 0)));
        let optimizer = PredictiveOptimizer::new(PredictiveConfig::default(), clock, Arc::new(Recorder::default()))
            .with_events(bus);
        optimizer.record_execution(&record("checkout", at(9, 1)));
        optimizer.generate_predictions();
        assert_eq!(rx.recv().await.unwrap().topic, Topic::PatternRecorded);
        assert_eq!(rx.recv().await.unwrap().topic, Topic::PredictionGenerated);
    }
}
