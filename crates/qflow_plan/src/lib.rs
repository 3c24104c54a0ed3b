//! Qflow Planner
//!
//! Builds the dependency graph of a flow and partitions its steps into
//! ordered groups of provably independent steps that can run in parallel.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analyzer;
pub mod error;
pub mod graph;
pub mod group;
pub mod step;

pub use analyzer::{find_conflict, AnalyzerConfig, Conflict, DependencyAnalyzer};
pub use error::{PlanError, PlanResult};
pub use graph::DependencyGraph;
pub use group::{ExecutionGroup, ExecutionPlan};
pub use step::{FlowDefinition, FlowStep, DEFAULT_STEP_TIMEOUT_MS};
