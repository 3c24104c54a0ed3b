//! Module compilation cache.
//!
//! Compiling a module is by far the most expensive step in standing up a
//! sandbox, so compiled modules are kept by the blake3 hash of their bytes
//! and shared by every runtime built from them.

use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use dashmap::DashMap;
use qflow_core::Hash;
use std::sync::Arc;
use tracing::{debug, info};
use wasmtime::{Config, Engine, ExternType, Module};

const WASM_MAGIC: &[u8; 4] = b"\0asm";
const WASM_VERSION: &[u8; 4] = b"\x01\x00\x00\x00";

/// A compiled module and what it exports
#[derive(Clone)]
pub struct CompiledModule {
    hash: Hash,
    module: Module,
    functions: Arc<[String]>,
    size: usize,
}

impl CompiledModule {
    /// Content hash of the module bytes
    #[must_use]
    pub const fn hash(&self) -> Hash {
        self.hash
    }

    /// The wasmtime module
    #[must_use]
    pub const fn module(&self) -> &Module {
        &self.module
    }

    /// Names of exported functions
    #[must_use]
    pub fn functions(&self) -> &[String] {
        &self.functions
    }

    /// Whether `name` is an exported function
    #[must_use]
    pub fn exports_function(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f == name)
    }

    /// Size of the module bytes
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("hash", &self.hash.prefix(12))
            .field("functions", &self.functions)
            .field("size", &self.size)
            .finish()
    }
}

/// Engine plus compiled modules keyed by content hash
pub struct ModuleCache {
    engine: Engine,
    config: SandboxConfig,
    modules: DashMap<Hash, CompiledModule>,
}

impl ModuleCache {
    /// Build a fuel-metering engine and an empty cache
    ///
    /// # Errors
    ///
    /// Returns `Engine` if wasmtime rejects the configuration
    pub fn new(config: SandboxConfig) -> SandboxResult<Self> {
        let mut engine_config = Config::new();
        engine_config.consume_fuel(true);
        let engine = Engine::new(&engine_config).map_err(|e| SandboxError::Engine(e.to_string()))?;
        Ok(Self {
            engine,
            config,
            modules: DashMap::new(),
        })
    }

    /// The shared engine
    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Sandbox limits
    #[must_use]
    pub const fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Compile `bytes`, or return the cached module with the same hash
    ///
    /// # Errors
    ///
    /// `ModuleTooLarge` or `InvalidModule`
    pub fn compile(&self, bytes: &[u8]) -> SandboxResult<CompiledModule> {
        let hash = Hash::compute(bytes);
        if let Some(hit) = self.modules.get(&hash) {
            debug!(module = %hash.prefix(12), "module cache hit");
            return Ok(hit.clone());
        }

        self.check_header(bytes)?;
        let module =
            Module::from_binary(&self.engine, bytes).map_err(|e| SandboxError::InvalidModule(e.to_string()))?;
        let functions: Arc<[String]> = module
            .exports()
            .filter(|e| matches!(e.ty(), ExternType::Func(_)))
            .map(|e| e.name().to_string())
            .collect();
        let compiled = CompiledModule {
            hash,
            module,
            functions,
            size: bytes.len(),
        };
        info!(module = %hash.prefix(12), size = bytes.len(), exports = compiled.functions.len(), "module compiled");
        Ok(self.modules.entry(hash).or_insert(compiled).clone())
    }

    fn check_header(&self, bytes: &[u8]) -> SandboxResult<()> {
        if bytes.len() > self.config.max_module_size {
            return Err(SandboxError::ModuleTooLarge {
                size: bytes.len(),
                limit: self.config.max_module_size,
            });
        }
        if bytes.len() < 8 {
            return Err(SandboxError::InvalidModule("truncated header".to_string()));
        }
        if &bytes[0..4] != WASM_MAGIC {
            return Err(SandboxError::InvalidModule("bad magic number".to_string()));
        }
        if &bytes[4..8] != WASM_VERSION {
            return Err(SandboxError::InvalidModule(format!("unsupported version {:?}", &bytes[4..8])));
        }
        Ok(())
    }

    /// Cached module by hash
    #[must_use]
    pub fn get(&self, hash: &Hash) -> Option<CompiledModule> {
        self.modules.get(hash).map(|m| m.clone())
    }

    /// Whether a module with that hash is cached
    #[must_use]
    pub fn contains(&self, hash: &Hash) -> bool {
        self.modules.contains_key(hash)
    }

    /// Drop a cached module. Runtimes already built from it keep working.
    pub fn evict(&self, hash: &Hash) -> bool {
        self.modules.remove(hash).is_some()
    }

    /// Number of cached modules
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("modules", &self.modules.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
