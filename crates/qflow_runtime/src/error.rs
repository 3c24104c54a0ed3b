//! Engine and service errors.

use qflow_core::StepId;
use qflow_lazy::LoadError;
use qflow_optimize::OptimizationError;
use qflow_plan::PlanError;
use qflow_pool::PoolError;
use qflow_wasm::SandboxError;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the engine and the service facade
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// The flow could not be planned
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// A step failed after its last attempt
    #[error("step {step} failed after {attempts} attempt(s): {reason}")]
    StepFailed {
        /// Failed step
        step: StepId,
        /// Attempts made
        attempts: u32,
        /// Last error
        reason: String,
    },

    /// A group failed under the fail-fast strategy
    #[error("flow aborted in group {group}: {}", .errors.join("; "))]
    FlowAborted {
        /// Index of the failing group
        group: usize,
        /// Step errors of that group
        errors: Vec<String>,
    },

    /// A pool operation failed
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A sandbox operation failed
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// An optimizer operation failed
    #[error(transparent)]
    Optimization(#[from] OptimizationError),

    /// A component failed to load
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Why a single attempt of an action failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    /// No handler for the action
    #[error("no handler for action {0}")]
    UnknownAction(String),

    /// The attempt ran past the step timeout
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// A parameter is missing or malformed
    #[error("bad parameter {name}: {reason}")]
    Parameter {
        /// Parameter name
        name: String,
        /// What was wrong
        reason: String,
    },

    /// No pooled resource could be leased
    #[error("resource unavailable: {0}")]
    Resource(String),

    /// The handler reported a failure
    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    /// Whether another attempt could succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnknownAction(_) | Self::Parameter { .. })
    }

    pub(crate) fn parameter(name: &str, reason: impl Into<String>) -> Self {
        Self::Parameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ActionError::Timeout(10).is_retryable());
        assert!(ActionError::Failed("boom".into()).is_retryable());
        assert!(!ActionError::UnknownAction("x".into()).is_retryable());
        assert!(!ActionError::parameter("ms", "not a number").is_retryable());
    }

    #[test]
    fn test_aborted_message() {
        let err = EngineError::FlowAborted {
            group: 1,
            errors: vec!["a failed".into(), "b failed".into()],
        };
        assert_eq!(err.to_string(), "flow aborted in group 1: a failed; b failed");
    }
}
