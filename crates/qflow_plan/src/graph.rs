//! Step dependency graph.
//!
//! Edges are discovered from textual step references in parameter strings,
//! from success/failure links and from explicit `depends_on` lists.

use crate::error::{PlanError, PlanResult};
use crate::step::FlowStep;
use indexmap::{IndexMap, IndexSet};
use qflow_core::StepId;
use regex::Regex;
use std::sync::LazyLock;

static REFERENCE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_-]+").expect("reference pattern is valid"));

/// Dependency graph over a flow's steps
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Step -> steps it depends on, in flow order
    dependencies: IndexMap<StepId, IndexSet<StepId>>,
    /// Step -> steps that depend on it
    dependents: IndexMap<StepId, IndexSet<StepId>>,
}

impl DependencyGraph {
    /// Build the graph for a flow
    ///
    /// # Errors
    ///
    /// Returns `DuplicateStep` for repeated ids, `UnknownStep` when an
    /// explicit link names a missing step, and `InvalidStep` for empty ids.
    pub fn build(steps: &[FlowStep]) -> PlanResult<Self> {
        let mut graph = Self::default();
        for step in steps {
            if step.id.as_str().is_empty() {
                return Err(PlanError::InvalidStep {
                    step: step.id.clone(),
                    reason: "step id must not be empty".to_string(),
                });
            }
            if graph.dependencies.contains_key(&step.id) {
                return Err(PlanError::DuplicateStep { id: step.id.clone() });
            }
            graph.dependencies.insert(step.id.clone(), IndexSet::new());
            graph.dependents.insert(step.id.clone(), IndexSet::new());
        }

        for step in steps {
            for text in step.parameter_strings() {
                for token in REFERENCE_TOKEN.find_iter(text) {
                    let token = token.as_str();
                    if token == step.id.as_str() {
                        continue;
                    }
                    let referenced = StepId::from(token);
                    if graph.dependencies.contains_key(&referenced) {
                        graph.add_edge(&step.id, referenced);
                    }
                }
            }

            for dep in &step.depends_on {
                graph.require_known(&step.id, dep)?;
                graph.add_edge(&step.id, dep.clone());
            }

            for successor in step.on_success.iter().chain(step.on_failure.iter()) {
                graph.require_known(&step.id, successor)?;
                graph.add_edge(successor, step.id.clone());
            }
        }

        Ok(graph)
    }

    fn require_known(&self, step: &StepId, reference: &StepId) -> PlanResult<()> {
        if self.dependencies.contains_key(reference) {
            Ok(())
        } else {
            Err(PlanError::UnknownStep {
                step: step.clone(),
                reference: reference.clone(),
            })
        }
    }

    fn add_edge(&mut self, step: &StepId, depends_on: StepId) {
        if let Some(deps) = self.dependents.get_mut(&depends_on) {
            deps.insert(step.clone());
        }
        if let Some(deps) = self.dependencies.get_mut(step) {
            deps.insert(depends_on);
        }
    }

    /// Direct dependencies of a step
    #[must_use]
    pub fn dependencies(&self, step: &StepId) -> Option<&IndexSet<StepId>> {
        self.dependencies.get(step)
    }

    /// Direct dependents of a step
    #[must_use]
    pub fn dependents(&self, step: &StepId) -> Option<&IndexSet<StepId>> {
        self.dependents.get(step)
    }

    /// Whether `step` depends on `on`, directly or transitively
    #[must_use]
    pub fn depends_on(&self, step: &StepId, on: &StepId) -> bool {
        let mut visited = IndexSet::new();
        let mut stack = vec![step];
        while let Some(current) = stack.pop() {
            let Some(deps) = self.dependencies.get(current) else {
                continue;
            };
            for dep in deps {
                if dep == on {
                    return true;
                }
                if visited.insert(dep) {
                    stack.push(dep);
                }
            }
        }
        false
    }

    /// Whether either step depends on the other
    #[must_use]
    pub fn connected(&self, a: &StepId, b: &StepId) -> bool {
        self.depends_on(a, b) || self.depends_on(b, a)
    }

    /// Step ids in flow order
    pub fn step_ids(&self) -> impl Iterator<Item = &StepId> {
        self.dependencies.keys()
    }

    /// Number of steps
    #[must_use]
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Whether the graph has no steps
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Number of dependency edges
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(IndexSet::len).sum()
    }

    /// Direct dependency map, owned
    #[must_use]
    pub fn to_dependency_map(&self) -> IndexMap<StepId, IndexSet<StepId>> {
        self.dependencies.clone()
    }
}
