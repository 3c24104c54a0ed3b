//! The validation usage heatmap.
//!
//! Every validation run is folded into a [`ValidationPattern`] and scored
//! into a [`HeatmapEntry`]. A decay loop cools entries that stop being
//! used and purges them after the retention window; an analysis loop turns
//! hot, worthwhile entries into [`PrewarmingJob`]s and runs them in
//! bounded batches against a [`PrewarmTarget`].

use crate::config::{HeatmapConfig, HeatmapConfigPatch};
use crate::job::{JobStatus, PrewarmStep, PrewarmTargets, PrewarmingJob};
use crate::pattern::{expected_benefit, HeatmapEntry, PatternKey, Scoring, ValidationPattern};
use crate::target::PrewarmTarget;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use qflow_core::{ema, JobId, SharedClock};
use qflow_events::{EventBus, Topic};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MS_PER_DAY: f64 = 86_400_000.0;

/// One observed validation run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    /// Validation latency in milliseconds
    pub latency_ms: f64,
    /// Whether validation succeeded
    pub success: bool,
    /// Resource usage in caller-defined units
    pub resource_usage: f64,
}

impl UsageSample {
    /// Sample with zero resource usage
    #[must_use]
    pub const fn new(latency_ms: f64, success: bool) -> Self {
        Self {
            latency_ms,
            success,
            resource_usage: 0.0,
        }
    }

    /// Set resource usage
    #[must_use]
    pub const fn with_resource_usage(mut self, usage: f64) -> Self {
        self.resource_usage = usage;
        self
    }
}

/// Outcome of a decay pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayReport {
    /// Entries whose hotness was recomputed
    pub decayed: usize,
    /// Entries purged with their pattern
    pub purged: usize,
}

/// Outcome of a job batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Jobs that completed
    pub completed: usize,
    /// Jobs that failed
    pub failed: usize,
}

#[derive(Default)]
struct HeatmapState {
    patterns: HashMap<PatternKey, ValidationPattern>,
    entries: HashMap<PatternKey, HeatmapEntry>,
    jobs: IndexMap<JobId, PrewarmingJob>,
}

impl HeatmapState {
    fn trim_history(&mut self, keep: usize) {
        let finished = self.jobs.values().filter(|j| !j.status.is_live()).count();
        let mut excess = finished.saturating_sub(keep);
        if excess == 0 {
            return;
        }
        self.jobs.retain(|_, job| {
            if excess > 0 && !job.status.is_live() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

/// Usage heatmap over validation patterns
pub struct ValidationHeatmap {
    clock: SharedClock,
    config: RwLock<HeatmapConfig>,
    state: Mutex<HeatmapState>,
    target: Arc<dyn PrewarmTarget>,
    events: Option<EventBus>,
}

impl std::fmt::Debug for ValidationHeatmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationHeatmap")
            .field("config", &*self.config.read())
            .field("patterns", &self.state.lock().patterns.len())
            .finish_non_exhaustive()
    }
}

impl ValidationHeatmap {
    /// Create an empty heatmap
    pub fn new(config: HeatmapConfig, clock: SharedClock, target: Arc<dyn PrewarmTarget>) -> Self {
        Self {
            clock,
            config: RwLock::new(config),
            state: Mutex::new(HeatmapState::default()),
            target,
            events: None,
        }
    }

    /// Report to an event bus
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, topic: Topic, payload: serde_json::Value) {
        if let Some(bus) = &self.events {
            bus.emit(topic, "heatmap", payload);
        }
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> HeatmapConfig {
        self.config.read().clone()
    }

    /// Apply a configuration patch. Takes effect on the next record or tick.
    pub fn update_config(&self, patch: &HeatmapConfigPatch) {
        self.config.write().apply(patch);
        info!(?patch, "heatmap config updated");
    }

    fn scoring(config: &HeatmapConfig) -> Scoring {
        Scoring {
            frequency_multiplier: config.frequency_score_multiplier,
            recency_window_hours: config.recency_window_hours,
        }
    }

    /// Fold one validation run into its pattern and rescore the entry
    pub fn record_usage(&self, key: PatternKey, sample: UsageSample) -> HeatmapEntry {
        let now = self.clock.now();
        let config = self.config();
        let entry = {
            let mut state = self.state.lock();
            let pattern = state.patterns.entry(key.clone()).or_insert_with(|| ValidationPattern {
                key: key.clone(),
                frequency: 0,
                avg_latency_ms: sample.latency_ms,
                success_rate: if sample.success { 1.0 } else { 0.0 },
                avg_resource_usage: sample.resource_usage,
                first_seen: now,
                last_seen: now,
            });
            if pattern.frequency > 0 {
                let alpha = config.ema_alpha;
                pattern.avg_latency_ms = ema(pattern.avg_latency_ms, sample.latency_ms, alpha);
                pattern.success_rate = ema(pattern.success_rate, f64::from(u8::from(sample.success)), alpha);
                pattern.avg_resource_usage = ema(pattern.avg_resource_usage, sample.resource_usage, alpha);
            }
            pattern.frequency += 1;
            pattern.last_seen = now;

            let hotness = Self::scoring(&config).hotness(pattern.frequency, 0.0, sample.success);
            let benefit = expected_benefit(pattern);
            let entry = state.entries.entry(key.clone()).or_insert_with(|| HeatmapEntry {
                key: key.clone(),
                hotness: 0.0,
                base_hotness: 0.0,
                prewarmed: false,
                expected_benefit: 0.0,
                last_access: now,
            });
            entry.hotness = hotness;
            entry.base_hotness = hotness;
            entry.expected_benefit = benefit;
            entry.last_access = now;
            entry.clone()
        };
        debug!(pattern = %key, hotness = entry.hotness, benefit = entry.expected_benefit, "usage recorded");
        self.emit(
            Topic::PatternRecorded,
            json!({"pattern": key.to_string(), "hotness": entry.hotness, "expected_benefit": entry.expected_benefit}),
        );
        entry
    }

    /// Cool every entry by its idle time and purge those past retention
    pub fn decay(&self) -> DecayReport {
        let now = self.clock.now();
        let config = self.config();
        let retention = ChronoDuration::days(config.retention_days);
        let mut report = DecayReport::default();
        let mut state = self.state.lock();

        let expired: Vec<PatternKey> = state
            .entries
            .values()
            .filter(|e| now.signed_duration_since(e.last_access) > retention)
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            state.entries.remove(key);
            state.patterns.remove(key);
        }
        let expired: HashSet<&PatternKey> = expired.iter().collect();
        state
            .jobs
            .retain(|_, job| job.status != JobStatus::Pending || !expired.contains(&job.key));
        report.purged = expired.len();

        for entry in state.entries.values_mut() {
            let idle_days = idle_ms(now, entry.last_access) / MS_PER_DAY;
            let decayed = (entry.base_hotness * config.decay_factor.powf(idle_days)).clamp(0.0, 100.0);
            entry.hotness = decayed.min(entry.hotness);
            report.decayed += 1;
        }
        drop(state);

        if report.purged > 0 {
            info!(purged = report.purged, "stale heatmap patterns purged");
        }
        report
    }

    /// Queue jobs for hot entries that are not warmed and have no live job.
    /// Returns the new job ids, hottest first.
    pub fn analyze(&self) -> Vec<JobId> {
        let now = self.clock.now();
        let config = self.config();
        let targets = PrewarmTargets {
            runtimes: config.prewarm_runtimes,
            cache_entries: config.prewarm_cache_entries,
            connections: config.prewarm_connections,
        };
        let mut state = self.state.lock();
        let busy: HashSet<PatternKey> = state
            .jobs
            .values()
            .filter(|j| j.status.is_live())
            .map(|j| j.key.clone())
            .collect();
        let mut candidates: Vec<(f64, PatternKey)> = state
            .entries
            .values()
            .filter(|e| {
                e.hotness >= config.hotness_threshold
                    && !e.prewarmed
                    && e.expected_benefit > config.min_expected_benefit
                    && !busy.contains(&e.key)
            })
            .map(|e| (e.hotness, e.key.clone()))
            .collect();
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut created = Vec::with_capacity(candidates.len());
        for (hotness, key) in candidates {
            let job = PrewarmingJob::new(key, targets, now);
            debug!(job = %job.id, pattern = %job.key, hotness, "pre-warming job queued");
            created.push(job.id);
            state.jobs.insert(job.id, job);
        }
        created
    }

    /// Run pending jobs, keeping at most `prewarming_batch_size` running
    pub async fn process_jobs(&self) -> BatchReport {
        let now = self.clock.now();
        let batch = self.config.read().prewarming_batch_size;
        let picked: Vec<PrewarmingJob> = {
            let mut state = self.state.lock();
            let running = state.jobs.values().filter(|j| j.status == JobStatus::Running).count();
            let room = batch.saturating_sub(running);
            state
                .jobs
                .values_mut()
                .filter(|j| j.status == JobStatus::Pending)
                .take(room)
                .map(|job| {
                    job.status = JobStatus::Running;
                    job.started_at = Some(now);
                    job.clone()
                })
                .collect()
        };
        if picked.is_empty() {
            return BatchReport::default();
        }

        let outcomes = futures::future::join_all(picked.into_iter().map(|job| self.run_job(job))).await;
        let mut report = BatchReport::default();
        for status in outcomes {
            match status {
                JobStatus::Completed => report.completed += 1,
                _ => report.failed += 1,
            }
        }
        let keep = self.config.read().job_history;
        self.state.lock().trim_history(keep);
        info!(completed = report.completed, failed = report.failed, "pre-warming batch finished");
        report
    }

    async fn run_job(&self, job: PrewarmingJob) -> JobStatus {
        for step in PrewarmStep::ALL {
            if job.is_done(step) {
                continue;
            }
            let result = match step {
                PrewarmStep::Cache => self.target.warm_cache(&job.key, job.targets.cache_entries).await,
                PrewarmStep::Runtimes => self.target.warm_runtimes(&job.key, job.targets.runtimes).await,
                PrewarmStep::Connections => self.target.warm_connections(&job.key, job.targets.connections).await,
            };
            let now = self.clock.now();
            let mut state = self.state.lock();
            let Some(stored) = state.jobs.get_mut(&job.id) else {
                // Purged while running.
                return JobStatus::Failed;
            };
            match result {
                Ok(()) => stored.completed_steps.push(step),
                Err(err) => {
                    stored.status = JobStatus::Failed;
                    stored.error = Some(format!("{step:?}: {err}"));
                    stored.finished_at = Some(now);
                    drop(state);
                    warn!(job = %job.id, pattern = %job.key, ?step, error = %err, "pre-warming job failed");
                    self.emit(
                        Topic::PrewarmJobFailed,
                        json!({"job": job.id.to_string(), "pattern": job.key.to_string(), "error": err.to_string()}),
                    );
                    return JobStatus::Failed;
                }
            }
        }

        let now = self.clock.now();
        {
            let mut state = self.state.lock();
            if let Some(stored) = state.jobs.get_mut(&job.id) {
                stored.status = JobStatus::Completed;
                stored.finished_at = Some(now);
            }
            if let Some(entry) = state.entries.get_mut(&job.key) {
                entry.prewarmed = true;
            }
        }
        self.emit(
            Topic::PrewarmJobCompleted,
            json!({"job": job.id.to_string(), "pattern": job.key.to_string()}),
        );
        JobStatus::Completed
    }

    /// Flag a pattern as warmed by someone else
    pub fn mark_prewarmed(&self, key: &PatternKey) -> bool {
        match self.state.lock().entries.get_mut(key) {
            Some(entry) => {
                entry.prewarmed = true;
                true
            }
            None => false,
        }
    }

    /// Pattern statistics
    #[must_use]
    pub fn pattern(&self, key: &PatternKey) -> Option<ValidationPattern> {
        self.state.lock().patterns.get(key).cloned()
    }

    /// Heatmap entry
    #[must_use]
    pub fn entry(&self, key: &PatternKey) -> Option<HeatmapEntry> {
        self.state.lock().entries.get(key).cloned()
    }

    /// The `n` hottest entries, hottest first
    #[must_use]
    pub fn hottest(&self, n: usize) -> Vec<HeatmapEntry> {
        let mut entries: Vec<HeatmapEntry> = self.state.lock().entries.values().cloned().collect();
        entries.sort_by(|a, b| b.hotness.total_cmp(&a.hotness).then_with(|| a.key.cmp(&b.key)));
        entries.truncate(n);
        entries
    }

    /// Entries at or above `min_hotness` that are not pre-warmed
    #[must_use]
    pub fn hot_unwarmed(&self, min_hotness: f64) -> Vec<HeatmapEntry> {
        let mut entries: Vec<HeatmapEntry> = self
            .state
            .lock()
            .entries
            .values()
            .filter(|e| e.hotness >= min_hotness && !e.prewarmed)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.hotness.total_cmp(&a.hotness));
        entries
    }

    /// Job by id
    #[must_use]
    pub fn job(&self, id: JobId) -> Option<PrewarmingJob> {
        self.state.lock().jobs.get(&id).cloned()
    }

    /// Jobs in queue order
    #[must_use]
    pub fn jobs(&self) -> Vec<PrewarmingJob> {
        self.state.lock().jobs.values().cloned().collect()
    }

    /// Number of tracked patterns
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().patterns.len()
    }

    /// Whether no patterns are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().patterns.is_empty()
    }
}

fn idle_ms(now: DateTime<Utc>, since: DateTime<Utc>) -> f64 {
    now.signed_duration_since(since).num_milliseconds().max(0) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{NoopTarget, PrewarmError};
    use async_trait::async_trait;
    use qflow_core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(n: u32) -> PatternKey {
        PatternKey::new(["schema", "auth"], &format!("{n:016x}ffff"), "v1")
    }

    fn heatmap_with(target: Arc<dyn PrewarmTarget>) -> (Arc<ManualClock>, ValidationHeatmap) {
        let clock = Arc::new(ManualClock::starting_now());
        let heatmap = ValidationHeatmap::new(HeatmapConfig::default(), clock.clone(), target);
        (clock, heatmap)
    }

    fn record_hot(heatmap: &ValidationHeatmap, key: &PatternKey) {
        for _ in 0..25 {
            heatmap.record_usage(key.clone(), UsageSample::new(50.0, true));
        }
    }

    #[derive(Default)]
    struct FlakyTarget {
        fail_runtimes: bool,
        calls: Mutex<Vec<PrewarmStep>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FlakyTarget {
        async fn enter(&self, step: PrewarmStep) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.calls.lock().push(step);
        }
    }

    #[async_trait]
    impl PrewarmTarget for FlakyTarget {
        async fn warm_cache(&self, _key: &PatternKey, _entries: usize) -> Result<(), PrewarmError> {
            self.enter(PrewarmStep::Cache).await;
            Ok(())
        }

        async fn warm_runtimes(&self, _key: &PatternKey, _count: usize) -> Result<(), PrewarmError> {
            self.enter(PrewarmStep::Runtimes).await;
            if self.fail_runtimes {
                return Err(PrewarmError::new("pool at capacity"));
            }
            Ok(())
        }

        async fn warm_connections(&self, _key: &PatternKey, _count: usize) -> Result<(), PrewarmError> {
            self.enter(PrewarmStep::Connections).await;
            Ok(())
        }
    }

    #[test]
    fn test_hot_pattern_yields_one_job() {
        let (_clock, heatmap) = heatmap_with(Arc::new(NoopTarget));
        let k = key(1);
        record_hot(&heatmap, &k);

        let entry = heatmap.entry(&k).unwrap();
        // 0.5 * 50 + 0.3 * 100 + 0.2 * 100
        assert_eq!(entry.hotness, 75.0);
        assert!((entry.expected_benefit - 37.5).abs() < 1e-9);
        let pattern = heatmap.pattern(&k).unwrap();
        assert_eq!(pattern.frequency, 25);
        assert!((pattern.avg_latency_ms - 50.0).abs() < 1e-9);

        assert_eq!(heatmap.analyze().len(), 1);
        assert!(heatmap.analyze().is_empty());
        assert_eq!(heatmap.jobs().len(), 1);
    }

    #[test]
    fn test_cold_or_cheap_patterns_skipped() {
        let (_clock, heatmap) = heatmap_with(Arc::new(NoopTarget));
        for _ in 0..15 {
            heatmap.record_usage(key(1), UsageSample::new(50.0, true));
        }
        for _ in 0..25 {
            heatmap.record_usage(key(2), UsageSample::new(1.0, true));
        }
        assert!(heatmap.entry(&key(1)).unwrap().hotness < 70.0);
        assert!(heatmap.entry(&key(2)).unwrap().hotness >= 70.0);
        assert!(heatmap.analyze().is_empty());
    }

    #[tokio::test]
    async fn test_completed_job_marks_prewarmed() {
        let target = Arc::new(FlakyTarget::default());
        let (_clock, heatmap) = heatmap_with(target.clone());
        let k = key(1);
        record_hot(&heatmap, &k);
        let id = heatmap.analyze()[0];

        let report = heatmap.process_jobs().await;
        assert_eq!(report, BatchReport { completed: 1, failed: 0 });
        let job = heatmap.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed_steps, PrewarmStep::ALL.to_vec());
        assert!(heatmap.entry(&k).unwrap().prewarmed);
        assert!(heatmap.analyze().is_empty());
        assert!(heatmap.hot_unwarmed(0.0).is_empty());
    }

    #[tokio::test]
    async fn test_failed_step_keeps_earlier_steps() {
        let target = Arc::new(FlakyTarget {
            fail_runtimes: true,
            ..FlakyTarget::default()
        });
        let (_clock, heatmap) = heatmap_with(target.clone());
        let k = key(1);
        record_hot(&heatmap, &k);
        let id = heatmap.analyze()[0];

        assert_eq!(heatmap.process_jobs().await.failed, 1);
        let job = heatmap.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.completed_steps, vec![PrewarmStep::Cache]);
        assert!(job.error.unwrap().contains("pool at capacity"));
        assert_eq!(*target.calls.lock(), vec![PrewarmStep::Cache, PrewarmStep::Runtimes]);
        assert!(!heatmap.entry(&k).unwrap().prewarmed);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_concurrency() {
        let target = Arc::new(FlakyTarget::default());
        let (_clock, heatmap) = heatmap_with(target.clone());
        heatmap.update_config(&HeatmapConfigPatch {
            prewarming_batch_size: Some(3),
            ..HeatmapConfigPatch::default()
        });
        for n in 0..8 {
            record_hot(&heatmap, &key(n));
        }
        assert_eq!(heatmap.analyze().len(), 8);

        let report = heatmap.process_jobs().await;
        assert_eq!(report.completed, 3);
        assert!(target.peak.load(Ordering::SeqCst) <= 3);
        let pending = heatmap.jobs().iter().filter(|j| j.status == JobStatus::Pending).count();
        assert_eq!(pending, 5);
    }

    #[test]
    fn test_decay_is_monotonic_and_purges() {
        let (clock, heatmap) = heatmap_with(Arc::new(NoopTarget));
        let k = key(1);
        record_hot(&heatmap, &k);
        let mut last = heatmap.entry(&k).unwrap().hotness;

        for _ in 0..6 {
            clock.advance(ChronoDuration::days(1));
            assert_eq!(heatmap.decay().purged, 0);
            let now = heatmap.entry(&k).unwrap().hotness;
            assert!(now <= last);
            assert!((0.0..=100.0).contains(&now));
            last = now;
        }
        assert!((last - 75.0 * 0.9f64.powi(6)).abs() < 1e-6);

        clock.advance(ChronoDuration::days(2));
        assert_eq!(heatmap.decay().purged, 1);
        assert!(heatmap.entry(&k).is_none());
        assert!(heatmap.is_empty());
    }

    #[test]
    fn test_usage_restores_heat() {
        let (clock, heatmap) = heatmap_with(Arc::new(NoopTarget));
        let k = key(1);
        record_hot(&heatmap, &k);
        clock.advance(ChronoDuration::days(3));
        heatmap.decay();
        assert!(heatmap.entry(&k).unwrap().hotness < 60.0);
        heatmap.record_usage(k.clone(), UsageSample::new(50.0, true));
        assert_eq!(heatmap.entry(&k).unwrap().hotness, 76.0);
    }

    #[test]
    fn test_failure_lowers_success_rate() {
        let (_clock, heatmap) = heatmap_with(Arc::new(NoopTarget));
        let k = key(1);
        heatmap.record_usage(k.clone(), UsageSample::new(10.0, true));
        let entry = heatmap.record_usage(k.clone(), UsageSample::new(30.0, false).with_resource_usage(4.0));
        let pattern = heatmap.pattern(&k).unwrap();
        assert!((pattern.success_rate - 0.9).abs() < 1e-9);
        assert!((pattern.avg_latency_ms - 12.0).abs() < 1e-9);
        assert!((pattern.avg_resource_usage - 0.4).abs() < 1e-9);
        // 0.5 * 4 + 0.3 * 100 + 0.2 * 50
        assert_eq!(entry.hotness, 42.0);
    }

    #[test]
    fn test_hottest_order() {
        let (_clock, heatmap) = heatmap_with(Arc::new(NoopTarget));
        heatmap.record_usage(key(1), UsageSample::new(5.0, true));
        record_hot(&heatmap, &key(2));
        let top = heatmap.hottest(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].key, key(2));
    }

    #[test]
    fn test_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let (_clock, heatmap) = heatmap_with(Arc::new(NoopTarget));
        let heatmap = heatmap.with_events(bus);
        heatmap.record_usage(key(1), UsageSample::new(5.0, true));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.topic, Topic::PatternRecorded);
        assert_eq!(event.source, "heatmap");
    }
}
