//! Qflow WASM Sandbox
//!
//! Sandboxed runtimes for `wasm:` flow actions. Modules are compiled once
//! per content hash by the [`ModuleCache`]; each [`SandboxRuntime`] is a
//! fuel-metered, memory-capped instance that pools through
//! [`SandboxFactory`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compile;
pub mod config;
pub mod error;
pub mod factory;
pub mod fuel;
pub mod sandbox;

pub use compile::{CompiledModule, ModuleCache};
pub use config::SandboxConfig;
pub use error::{SandboxError, SandboxResult};
pub use factory::SandboxFactory;
pub use fuel::FuelLedger;
pub use sandbox::{Invocation, SandboxRuntime};
