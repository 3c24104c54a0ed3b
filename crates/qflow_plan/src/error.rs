//! Planning errors.

use qflow_core::StepId;

/// Result type for planning operations
pub type PlanResult<T> = Result<T, PlanError>;

/// Errors raised while analyzing a flow
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// The flow contains a dependency cycle; no groups are produced
    #[error("circular dependency among steps: {}", format_ids(.steps))]
    CircularDependency {
        /// Steps that could not be placed
        steps: Vec<StepId>,
    },

    /// Two steps share an id
    #[error("duplicate step id: {id}")]
    DuplicateStep {
        /// The repeated id
        id: StepId,
    },

    /// An explicit link names a step that does not exist
    #[error("step {step} references unknown step {reference}")]
    UnknownStep {
        /// Step carrying the link
        step: StepId,
        /// Missing target
        reference: StepId,
    },

    /// A step field is invalid
    #[error("invalid step {step}: {reason}")]
    InvalidStep {
        /// Offending step
        step: StepId,
        /// Why it was rejected
        reason: String,
    },
}

fn format_ids(ids: &[StepId]) -> String {
    ids.iter().map(StepId::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = PlanError::CircularDependency {
            steps: vec![StepId::from("a"), StepId::from("b")],
        };
        assert_eq!(err.to_string(), "circular dependency among steps: a, b");
    }
}
