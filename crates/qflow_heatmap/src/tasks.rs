//! Background loops for the heatmap.

use crate::heatmap::ValidationHeatmap;
use async_trait::async_trait;
use qflow_events::PeriodicTask;
use std::sync::Arc;
use tracing::debug;

/// Cools and purges entries
#[derive(Debug, Clone)]
pub struct DecayTask(pub Arc<ValidationHeatmap>);

#[async_trait]
impl PeriodicTask for DecayTask {
    fn name(&self) -> &'static str {
        "heatmap-decay"
    }

    async fn tick(&self) {
        let report = self.0.decay();
        debug!(decayed = report.decayed, purged = report.purged, "heatmap decayed");
    }
}

/// Queues and runs pre-warming jobs
#[derive(Debug, Clone)]
pub struct AnalysisTask(pub Arc<ValidationHeatmap>);

#[async_trait]
impl PeriodicTask for AnalysisTask {
    fn name(&self) -> &'static str {
        "heatmap-analysis"
    }

    async fn tick(&self) {
        let queued = self.0.analyze();
        if !queued.is_empty() {
            debug!(queued = queued.len(), "pre-warming jobs queued");
        }
        self.0.process_jobs().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeatmapConfig;
    use crate::heatmap::UsageSample;
    use crate::job::JobStatus;
    use crate::pattern::PatternKey;
    use crate::target::NoopTarget;
    use qflow_core::SystemClock;
    use qflow_events::TaskGroup;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_analysis_loop_runs_jobs() {
        let heatmap = Arc::new(ValidationHeatmap::new(
            HeatmapConfig::default(),
            SystemClock::shared(),
            Arc::new(NoopTarget),
        ));
        let key = PatternKey::new(["schema"], "00ff", "v2");
        for _ in 0..25 {
            heatmap.record_usage(key.clone(), UsageSample::new(40.0, true));
        }

        let mut group = TaskGroup::new();
        group.spawn(Arc::new(AnalysisTask(heatmap.clone())), Duration::from_secs(300));
        group.spawn(Arc::new(DecayTask(heatmap.clone())), Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_secs(301)).await;
        group.shutdown().await;

        let jobs = heatmap.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
    }
}
