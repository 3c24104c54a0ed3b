//! Sandbox limits.

use serde::{Deserialize, Serialize};

/// Limits applied to every sandbox runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Fuel granted to a single invocation
    pub max_fuel: u64,
    /// Linear memory cap per instance, in bytes
    pub memory_limit: usize,
    /// Largest module accepted by the cache, in bytes
    pub max_module_size: usize,
    /// Invocations an instance serves before it reports unhealthy
    pub max_executions: u64,
    /// Re-instantiate on every release instead of only after a trap
    pub reset_between_uses: bool,
}

impl SandboxConfig {
    /// Defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-invocation fuel
    #[must_use]
    pub const fn with_max_fuel(mut self, fuel: u64) -> Self {
        self.max_fuel = fuel;
        self
    }

    /// Set the memory cap
    #[must_use]
    pub const fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Set the execution cap
    #[must_use]
    pub const fn with_max_executions(mut self, executions: u64) -> Self {
        self.max_executions = executions;
        self
    }

    /// Choose when instances are rebuilt
    #[must_use]
    pub const fn with_reset_between_uses(mut self, reset: bool) -> Self {
        self.reset_between_uses = reset;
        self
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_fuel: 10_000_000,
            memory_limit: 16 * 1024 * 1024,
            max_module_size: 10 * 1024 * 1024,
            max_executions: 10_000,
            reset_between_uses: true,
        }
    }
}
