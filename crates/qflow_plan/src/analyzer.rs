//! Dependency analysis.
//!
//! Steps are levelled topologically: a step joins the first level after
//! every one of its dependencies. Each level is then split first-fit into
//! groups whose members do not conflict. A round that cannot place any
//! remaining step means the flow has a cycle.

use crate::error::{PlanError, PlanResult};
use crate::graph::DependencyGraph;
use crate::group::{ExecutionGroup, ExecutionPlan};
use crate::step::FlowStep;
use indexmap::{IndexMap, IndexSet};
use qflow_core::StepId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Analyzer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Split groups larger than this
    #[serde(default)]
    pub max_group_size: Option<usize>,
}

impl AnalyzerConfig {
    /// Cap group size
    #[must_use]
    pub fn with_max_group_size(mut self, size: usize) -> Self {
        self.max_group_size = Some(size.max(1));
        self
    }
}

/// Why two steps cannot share a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// One step depends on the other
    Dependency,
    /// Both write the same target
    SharedWrite(String),
    /// One reads what the other writes
    ReadWrite(String),
    /// Both need the same exclusive resource
    ExclusiveResource(String),
}

/// Find the first conflict between two steps, if any
#[must_use]
pub fn find_conflict(a: &FlowStep, b: &FlowStep, graph: &DependencyGraph) -> Option<Conflict> {
    if graph.connected(&a.id, &b.id) {
        return Some(Conflict::Dependency);
    }
    if let Some(target) = a.writes.intersection(&b.writes).next() {
        return Some(Conflict::SharedWrite(target.clone()));
    }
    if let Some(target) = a
        .writes
        .intersection(&b.reads)
        .chain(a.reads.intersection(&b.writes))
        .next()
    {
        return Some(Conflict::ReadWrite(target.clone()));
    }
    if let Some(resource) = a
        .exclusive_resources
        .intersection(&b.exclusive_resources)
        .next()
    {
        return Some(Conflict::ExclusiveResource(resource.clone()));
    }
    None
}

/// Turns an ordered list of steps into parallel execution groups
#[derive(Debug, Clone, Default)]
pub struct DependencyAnalyzer {
    config: AnalyzerConfig,
}

impl DependencyAnalyzer {
    /// Create an analyzer
    #[must_use]
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Replace the configuration
    pub fn set_config(&mut self, config: AnalyzerConfig) {
        self.config = config;
    }

    /// Analyze a flow
    ///
    /// # Errors
    ///
    /// Returns `CircularDependency` when the steps form a cycle, plus any
    /// graph construction error (duplicate or unknown ids).
    pub fn analyze(&self, steps: &[FlowStep]) -> PlanResult<ExecutionPlan> {
        let graph = DependencyGraph::build(steps)?;
        let by_id: IndexMap<&StepId, &FlowStep> = steps.iter().map(|s| (&s.id, s)).collect();

        let levels = level_steps(&graph)?;
        let mut groups = Vec::new();

        for (level, ids) in levels.iter().enumerate() {
            let mut partitions: Vec<Vec<&FlowStep>> = Vec::new();
            for id in ids {
                let Some(step) = by_id.get(id).copied() else {
                    continue;
                };
                let slot = partitions.iter().position(|members| {
                    let fits = self
                        .config
                        .max_group_size
                        .is_none_or(|max| members.len() < max);
                    fits && members.iter().all(|other| {
                        let conflict = find_conflict(step, other, &graph);
                        if let Some(conflict) = &conflict {
                            debug!(step = %step.id, other = %other.id, ?conflict, "steps conflict");
                        }
                        conflict.is_none()
                    })
                });
                match slot {
                    Some(index) => partitions[index].push(step),
                    None => partitions.push(vec![step]),
                }
            }

            let mut level_groups: Vec<ExecutionGroup> = partitions
                .into_iter()
                .map(|members| build_group(level, members, &graph))
                .collect();
            // Stable: equal priorities keep flow order.
            level_groups.sort_by(|a, b| b.priority.cmp(&a.priority));
            groups.extend(level_groups);
        }

        for (index, group) in groups.iter_mut().enumerate() {
            group.index = index;
        }

        let estimated_sequential_ms = steps.iter().map(|s| s.timeout_ms).sum();
        let estimated_parallel_ms = groups.iter().map(|g| g.estimated_duration_ms).sum();
        let critical_path = critical_path(&levels, &graph, &by_id);

        info!(
            steps = steps.len(),
            groups = groups.len(),
            levels = levels.len(),
            estimated_parallel_ms,
            "flow analyzed"
        );

        Ok(ExecutionPlan {
            groups,
            levels: levels.len(),
            dependencies: graph.to_dependency_map(),
            estimated_sequential_ms,
            estimated_parallel_ms,
            critical_path,
        })
    }
}

/// Assign every step to a level; fails if a round places nothing
fn level_steps(graph: &DependencyGraph) -> PlanResult<Vec<Vec<StepId>>> {
    let mut placed: IndexSet<StepId> = IndexSet::new();
    let mut remaining: Vec<StepId> = graph.step_ids().cloned().collect();
    let mut levels = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<StepId>, Vec<StepId>) =
            remaining.into_iter().partition(|id| {
                graph
                    .dependencies(id)
                    .is_none_or(|deps| deps.iter().all(|dep| placed.contains(dep)))
            });

        if ready.is_empty() {
            warn!(steps = blocked.len(), "circular dependency detected");
            return Err(PlanError::CircularDependency { steps: blocked });
        }

        placed.extend(ready.iter().cloned());
        levels.push(ready);
        remaining = blocked;
    }

    Ok(levels)
}

fn build_group(level: usize, members: Vec<&FlowStep>, graph: &DependencyGraph) -> ExecutionGroup {
    let ids: IndexSet<&StepId> = members.iter().map(|s| &s.id).collect();
    let external_dependencies = members
        .iter()
        .filter_map(|s| graph.dependencies(&s.id))
        .flatten()
        .filter(|dep| !ids.contains(dep))
        .cloned()
        .collect();

    ExecutionGroup {
        index: 0,
        level,
        estimated_duration_ms: members.iter().map(|s| s.timeout_ms).max().unwrap_or(0),
        priority: members.iter().map(|s| s.priority()).max().unwrap_or(0),
        steps: members.into_iter().cloned().collect(),
        external_dependencies,
    }
}

fn critical_path(
    levels: &[Vec<StepId>],
    graph: &DependencyGraph,
    by_id: &IndexMap<&StepId, &FlowStep>,
) -> Vec<StepId> {
    let mut best: IndexMap<&StepId, (u64, Option<&StepId>)> = IndexMap::new();
    for id in levels.iter().flatten() {
        let own = by_id.get(id).map_or(0, |s| s.timeout_ms);
        let mut entry = (own, None);
        for dep in graph.dependencies(id).into_iter().flatten() {
            if let Some((length, _)) = best.get(dep) {
                if own + length > entry.0 {
                    entry = (own + length, Some(dep));
                }
            }
        }
        best.insert(id, entry);
    }

    let Some(mut cursor) = best
        .iter()
        .max_by_key(|(_, (length, _))| *length)
        .map(|(id, _)| *id)
    else {
        return Vec::new();
    };

    let mut path = vec![cursor.clone()];
    while let Some((_, Some(previous))) = best.get(cursor) {
        path.push((*previous).clone());
        cursor = *previous;
    }
    path.reverse();
    path
}
