//! Step outcomes and flow results.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use qflow_core::{ExecutionId, ResourceKind, StepId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The action succeeded
    Completed,
    /// The last attempt failed
    Failed,
    /// The last attempt ran past the step timeout
    TimedOut,
    /// A dependency did not complete
    Cancelled,
    /// A failure handler whose source step succeeded
    Skipped,
}

impl StepStatus {
    /// Failed or timed out
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }

    /// Whether the action actually ran
    #[must_use]
    pub const fn ran(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// Result of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Step id
    pub step: StepId,
    /// Group the step ran in
    pub group: usize,
    /// Final status
    pub status: StepStatus,
    /// Attempts made
    pub attempts: u32,
    /// Action output
    pub output: Option<Value>,
    /// Last error
    pub error: Option<String>,
    /// Time spent across attempts, in microseconds
    pub duration_us: u64,
    /// Pooled resource kind the step used
    pub resource: Option<ResourceKind>,
}

impl StepOutcome {
    pub(crate) fn not_run(step: StepId, group: usize, status: StepStatus, error: Option<String>) -> Self {
        Self {
            step,
            group,
            status,
            attempts: 0,
            output: None,
            error,
            duration_us: 0,
            resource: None,
        }
    }
}

/// Result of a flow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Execution id
    pub execution: ExecutionId,
    /// Every step completed or was skipped
    pub success: bool,
    /// Outcomes in plan order
    pub steps: IndexMap<StepId, StepOutcome>,
    /// Errors of failed and cancelled steps
    pub errors: Vec<String>,
    /// Groups run
    pub groups: usize,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Wall time in milliseconds
    pub total_ms: u64,
    /// Busy step time over wall time, capped at 1
    pub parallel_efficiency: f64,
    /// Mean pool utilization sampled at each acquisition
    pub resource_utilization: f64,
}

impl ExecutionResult {
    /// Outcome of a step
    #[must_use]
    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.steps.get(&StepId::from(step))
    }

    /// Steps with `status`
    #[must_use]
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.values().filter(|o| o.status == status).count()
    }
}
