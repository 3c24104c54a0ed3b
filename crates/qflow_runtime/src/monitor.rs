//! Execution telemetry.
//!
//! Observers receive one [`StepTelemetry`] per finished step and the
//! [`ExecutionResult`] of every flow. [`ExecutionMonitor`] is the built-in
//! observer that keeps counters and a short history.

use crate::result::{ExecutionResult, StepStatus};
use parking_lot::Mutex;
use qflow_core::{ExecutionId, ResourceKind, StepId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Telemetry for one finished step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTelemetry {
    /// Flow execution
    pub execution: ExecutionId,
    /// Step id
    pub step: StepId,
    /// Group index
    pub group: usize,
    /// Final status
    pub status: StepStatus,
    /// Attempts made
    pub attempts: u32,
    /// Time spent in microseconds
    pub duration_us: u64,
    /// Pooled resource kind used
    pub resource: Option<ResourceKind>,
}

/// Hook for execution telemetry
pub trait ExecutionObserver: Send + Sync + 'static {
    /// A step finished
    fn on_step(&self, _telemetry: &StepTelemetry) {}

    /// A flow finished, or was aborted
    fn on_flow(&self, _result: &ExecutionResult) {}
}

/// Engine counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Flows run
    pub flows_executed: u64,
    /// Flows where every step completed or was skipped
    pub flows_succeeded: u64,
    /// Steps whose action ran
    pub steps_executed: u64,
    /// Steps completed
    pub steps_completed: u64,
    /// Steps failed or timed out
    pub steps_failed: u64,
    /// Steps cancelled
    pub steps_cancelled: u64,
    /// Failure handlers skipped
    pub steps_skipped: u64,
    /// Attempts beyond the first
    pub retries: u64,
    /// Step time in microseconds
    pub busy_us: u64,
}

impl Metrics {
    /// Completed share of executed steps (0.0 - 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.steps_executed == 0 {
            return 1.0;
        }
        self.steps_completed as f64 / self.steps_executed as f64
    }

    /// Failed share of executed steps (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.steps_executed == 0 {
            return 0.0;
        }
        self.steps_failed as f64 / self.steps_executed as f64
    }

    fn record(&mut self, telemetry: &StepTelemetry) {
        if telemetry.status.ran() {
            self.steps_executed += 1;
        }
        match telemetry.status {
            StepStatus::Completed => self.steps_completed += 1,
            StepStatus::Failed | StepStatus::TimedOut => self.steps_failed += 1,
            StepStatus::Cancelled => self.steps_cancelled += 1,
            StepStatus::Skipped => self.steps_skipped += 1,
        }
        self.retries += u64::from(telemetry.attempts.saturating_sub(1));
        self.busy_us += telemetry.duration_us;
    }
}

/// Counters plus the most recent step telemetry
#[derive(Debug)]
pub struct ExecutionMonitor {
    metrics: Mutex<Metrics>,
    history: Mutex<VecDeque<StepTelemetry>>,
    max_history: usize,
}

impl ExecutionMonitor {
    /// Monitor keeping the last `max_history` steps
    #[must_use]
    pub fn new(max_history: usize) -> Self {
        Self {
            metrics: Mutex::new(Metrics::default()),
            history: Mutex::new(VecDeque::new()),
            max_history,
        }
    }

    /// Current counters
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        self.metrics.lock().clone()
    }

    /// Recent steps, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<StepTelemetry> {
        self.history.lock().iter().cloned().collect()
    }

    /// Clear counters and history
    pub fn reset(&self) {
        *self.metrics.lock() = Metrics::default();
        self.history.lock().clear();
    }
}

impl Default for ExecutionMonitor {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ExecutionObserver for ExecutionMonitor {
    fn on_step(&self, telemetry: &StepTelemetry) {
        self.metrics.lock().record(telemetry);
        let mut history = self.history.lock();
        history.push_back(telemetry.clone());
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    fn on_flow(&self, result: &ExecutionResult) {
        let mut metrics = self.metrics.lock();
        metrics.flows_executed += 1;
        if result.success {
            metrics.flows_succeeded += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry(status: StepStatus, attempts: u32) -> StepTelemetry {
        StepTelemetry {
            execution: ExecutionId::new(),
            step: StepId::from("s"),
            group: 0,
            status,
            attempts,
            duration_us: 10,
            resource: None,
        }
    }

    #[test]
    fn test_metrics_rates() {
        let monitor = ExecutionMonitor::new(10);
        assert_eq!(monitor.metrics().success_rate(), 1.0);
        monitor.on_step(&telemetry(StepStatus::Completed, 1));
        monitor.on_step(&telemetry(StepStatus::TimedOut, 3));
        monitor.on_step(&telemetry(StepStatus::Cancelled, 0));

        let metrics = monitor.metrics();
        assert_eq!(metrics.steps_executed, 2);
        assert_eq!(metrics.failure_rate(), 0.5);
        assert_eq!(metrics.retries, 2);
        assert_eq!(metrics.steps_cancelled, 1);
        assert_eq!(metrics.busy_us, 30);
    }

    #[test]
    fn test_history_is_bounded() {
        let monitor = ExecutionMonitor::new(3);
        for _ in 0..4 {
            monitor.on_step(&telemetry(StepStatus::Completed, 1));
        }
        assert_eq!(monitor.history().len(), 3);
        monitor.reset();
        assert!(monitor.history().is_empty());
        assert_eq!(monitor.metrics().steps_completed, 0);
    }
}
