//! Qflow Validation Heatmap
//!
//! Tracks how often each validation pattern runs and how hot it is, and
//! turns hot, worthwhile patterns into pre-warming jobs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod heatmap;
pub mod job;
pub mod pattern;
pub mod target;
pub mod tasks;

pub use config::{HeatmapConfig, HeatmapConfigPatch};
pub use heatmap::{BatchReport, DecayReport, UsageSample, ValidationHeatmap};
pub use job::{JobStatus, PrewarmStep, PrewarmTargets, PrewarmingJob};
pub use pattern::{expected_benefit, HeatmapEntry, PatternKey, ValidationPattern, INPUT_PREFIX_LEN};
pub use target::{NoopTarget, PrewarmError, PrewarmTarget};
pub use tasks::{AnalysisTask, DecayTask};
