//! Sandbox errors.

/// Result type for sandbox operations
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Errors raised while compiling, instantiating or invoking a module
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    /// The bytes are not a usable WASM module
    #[error("invalid WASM module: {0}")]
    InvalidModule(String),

    /// The module is larger than the configured limit
    #[error("module size {size} exceeds limit {limit}")]
    ModuleTooLarge {
        /// Module size in bytes
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// The engine could not be built
    #[error("engine setup failed: {0}")]
    Engine(String),

    /// Instantiation failed (missing imports, start trap, limits)
    #[error("instantiation failed: {0}")]
    Instantiate(String),

    /// No function export with that name
    #[error("no exported function {0}")]
    MissingExport(String),

    /// Arguments or results do not fit the export's signature
    #[error("export {export}: {reason}")]
    Signature {
        /// Export name
        export: String,
        /// What did not fit
        reason: String,
    },

    /// The invocation ran out of fuel
    #[error("fuel exhausted after {limit} units")]
    FuelExhausted {
        /// Fuel granted to the invocation
        limit: u64,
    },

    /// The guest trapped
    #[error("guest trapped: {0}")]
    Trap(String),

    /// The runtime must be reset before it can run again
    #[error("runtime unusable until reset: {0}")]
    Unhealthy(String),

    /// A blocking invocation task failed
    #[error("invocation task failed: {0}")]
    Join(String),
}

impl SandboxError {
    /// Whether the failure leaves the instance in an unknown state
    #[must_use]
    pub const fn poisons_instance(&self) -> bool {
        matches!(self, Self::FuelExhausted { .. } | Self::Trap(_))
    }
}
