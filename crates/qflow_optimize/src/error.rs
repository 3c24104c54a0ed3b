//! Optimizer errors.

use qflow_core::Hash;
use qflow_pool::PoolError;
use qflow_wasm::SandboxError;

/// Result type for optimizer operations
pub type OptimizationResult<T> = Result<T, OptimizationError>;

/// Errors raised while scaling pools or applying recommendations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptimizationError {
    /// No pool for the module hash
    #[error("no runtime pool for module {0}")]
    UnknownModule(Hash),

    /// Module compilation or instantiation failed
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// A pool operation failed
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The optimization target rejected the action
    #[error("optimization target failed: {0}")]
    Target(String),
}
