//! Qflow Optimizers
//!
//! The runtime pool optimizer sizes one sandbox pool per module from its
//! load. The predictive optimizer learns when flows run and adds capacity
//! shortly before it is needed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod prediction;
pub mod predictive;
pub mod runtime;
pub mod target;

pub use config::{OptimizerConfig, OptimizerConfigPatch, PredictiveConfig, PredictiveConfigPatch, WarmupStrategy};
pub use error::{OptimizationError, OptimizationResult};
pub use prediction::{
    ExecutionPattern, ExecutionPatternKey, ExecutionRecord, OptimizationExecution, OptimizationPrediction,
    OptimizationRecommendation, PredictiveModel, RecommendationStatus, RecommendedAction,
};
pub use predictive::{PredictionTask, PredictiveOptimizer, SchedulerTask};
pub use runtime::{OptimizationKind, OptimizationStatus, OptimizerTask, PoolOptimization, RuntimePoolOptimizer};
pub use target::{Capacity, OptimizationTarget};
