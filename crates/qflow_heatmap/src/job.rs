//! Pre-warming jobs.

use crate::pattern::PatternKey;
use chrono::{DateTime, Utc};
use qflow_core::JobId;
use serde::{Deserialize, Serialize};

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued
    Pending,
    /// Sub-steps in progress
    Running,
    /// Every sub-step done
    Completed,
    /// A sub-step failed; earlier ones are kept
    Failed,
}

impl JobStatus {
    /// Pending or running
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// One pre-warming sub-step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrewarmStep {
    /// Populate validation cache entries
    Cache,
    /// Create sandbox runtimes
    Runtimes,
    /// Open connections
    Connections,
}

impl PrewarmStep {
    /// Steps in execution order
    pub const ALL: [Self; 3] = [Self::Cache, Self::Runtimes, Self::Connections];
}

/// How much a job warms up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrewarmTargets {
    /// Sandbox runtimes
    pub runtimes: usize,
    /// Cache entries
    pub cache_entries: usize,
    /// Connections
    pub connections: usize,
}

/// A queued or finished pre-warming job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrewarmingJob {
    /// Job id
    pub id: JobId,
    /// Pattern being warmed
    pub key: PatternKey,
    /// Amounts to warm
    pub targets: PrewarmTargets,
    /// Lifecycle state
    pub status: JobStatus,
    /// Sub-steps that finished
    pub completed_steps: Vec<PrewarmStep>,
    /// Failure reason
    pub error: Option<String>,
    /// Queue time
    pub created_at: DateTime<Utc>,
    /// Start of the latest run
    pub started_at: Option<DateTime<Utc>>,
    /// End of the latest run
    pub finished_at: Option<DateTime<Utc>>,
}

impl PrewarmingJob {
    pub(crate) fn new(key: PatternKey, targets: PrewarmTargets, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            key,
            targets,
            status: JobStatus::Pending,
            completed_steps: Vec::new(),
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Whether `step` already finished
    #[must_use]
    pub fn is_done(&self, step: PrewarmStep) -> bool {
        self.completed_steps.contains(&step)
    }
}
