//! Execution groups and plans.

use crate::step::FlowStep;
use indexmap::{IndexMap, IndexSet};
use qflow_core::StepId;
use serde::{Deserialize, Serialize};

/// Steps that can run concurrently
///
/// Members are pairwise independent: no dependency edge in either
/// direction, no shared write target, no read/write overlap and no shared
/// exclusive resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionGroup {
    /// Position in the plan
    pub index: usize,
    /// Dependency level the group belongs to
    pub level: usize,
    /// Member steps
    pub steps: Vec<FlowStep>,
    /// Dependencies of members that live outside the group
    pub external_dependencies: IndexSet<StepId>,
    /// Longest member timeout
    pub estimated_duration_ms: u64,
    /// Highest member priority
    pub priority: u32,
}

impl ExecutionGroup {
    /// Member ids in order
    #[must_use]
    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }

    /// Number of member steps
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the group is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether a step belongs to the group
    #[must_use]
    pub fn contains(&self, id: &StepId) -> bool {
        self.steps.iter().any(|s| &s.id == id)
    }
}

/// Output of the dependency analyzer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Groups in execution order
    pub groups: Vec<ExecutionGroup>,
    /// Number of dependency levels
    pub levels: usize,
    /// Direct dependencies of every step
    pub dependencies: IndexMap<StepId, IndexSet<StepId>>,
    /// Sum of every step timeout
    pub estimated_sequential_ms: u64,
    /// Sum of group durations
    pub estimated_parallel_ms: u64,
    /// Longest chain of dependent steps by timeout
    pub critical_path: Vec<StepId>,
}

impl ExecutionPlan {
    /// Group membership as ids, for inspection
    #[must_use]
    pub fn group_ids(&self) -> Vec<Vec<StepId>> {
        self.groups.iter().map(ExecutionGroup::step_ids).collect()
    }

    /// Total number of steps across all groups
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.groups.iter().map(ExecutionGroup::len).sum()
    }

    /// Direct dependencies of a step
    #[must_use]
    pub fn dependencies_of(&self, id: &StepId) -> Option<&IndexSet<StepId>> {
        self.dependencies.get(id)
    }

    /// Estimated speedup over running every step in sequence
    #[must_use]
    pub fn estimated_speedup(&self) -> f64 {
        if self.estimated_parallel_ms == 0 {
            return 1.0;
        }
        self.estimated_sequential_ms as f64 / self.estimated_parallel_ms as f64
    }

    /// Whether the plan is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
