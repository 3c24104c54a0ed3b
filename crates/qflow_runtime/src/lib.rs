//! Qflow runtime
//!
//! Runs flows as ordered groups of independent steps under a concurrency
//! bound, leasing sandbox runtimes and connections from the pool manager.
//! [`Qflow`] wires the engine to the optimizers, the usage heatmap and the
//! lazy component cache and runs their background tasks.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod result;
pub mod retry;
pub mod service;
pub mod targets;

pub use action::{
    ActionHandler, ActionRegistry, ConnectionProbe, EchoAction, FailAction, NoopAction, SleepAction, StepContext,
    WasmAction,
};
pub use config::{EngineConfig, EngineConfigPatch, FailureStrategy, QflowConfig};
pub use engine::ParallelExecutionEngine;
pub use error::{ActionError, EngineError, EngineResult};
pub use monitor::{ExecutionMonitor, ExecutionObserver, Metrics, StepTelemetry};
pub use result::{ExecutionResult, StepOutcome, StepStatus};
pub use retry::RetryPolicy;
pub use service::{Qflow, QflowStatus};
pub use targets::{CapacityBridge, PrewarmBridge};
