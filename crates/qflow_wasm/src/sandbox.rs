//! Sandboxed runtime resource.
//!
//! A [`SandboxRuntime`] is one live instance of a compiled module with its
//! own store, memory cap and fuel budget. It is the pooled resource behind
//! `wasm:` actions. A trap or fuel exhaustion leaves the instance unusable
//! until [`SandboxRuntime::reset`] rebuilds it.

use crate::compile::CompiledModule;
use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::fuel::FuelLedger;
use parking_lot::Mutex;
use qflow_core::Hash;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use wasmtime::{Instance, Store, StoreLimits, StoreLimitsBuilder, Trap, Val, ValType};

struct StoreState {
    limits: StoreLimits,
}

struct Live {
    store: Store<StoreState>,
    instance: Instance,
    executions: u64,
    poisoned: Option<String>,
}

/// Result of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    /// Export that ran
    pub export: String,
    /// First result, widened to i64
    pub value: Option<i64>,
    /// Fuel used
    pub fuel_consumed: u64,
    /// Wall time in microseconds
    pub elapsed_us: u64,
}

/// One instantiated module
pub struct SandboxRuntime {
    module: CompiledModule,
    config: SandboxConfig,
    live: Mutex<Live>,
    fuel: Mutex<FuelLedger>,
}

impl SandboxRuntime {
    /// Instantiate `module`
    ///
    /// # Errors
    ///
    /// Returns `Instantiate` if the module imports anything, traps in its
    /// start function or exceeds the memory cap
    pub fn new(module: CompiledModule, config: SandboxConfig) -> SandboxResult<Self> {
        let live = instantiate(&module, &config)?;
        Ok(Self {
            module,
            config,
            live: Mutex::new(live),
            fuel: Mutex::new(FuelLedger::default()),
        })
    }

    /// Hash of the module this runtime runs
    #[must_use]
    pub fn module_hash(&self) -> Hash {
        self.module.hash()
    }

    /// Invocations since the last reset
    #[must_use]
    pub fn executions(&self) -> u64 {
        self.live.lock().executions
    }

    /// Fuel totals since creation
    #[must_use]
    pub fn fuel(&self) -> FuelLedger {
        self.fuel.lock().clone()
    }

    /// Whether the instance can take another invocation
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        let live = self.live.lock();
        live.poisoned.is_none() && live.executions < self.config.max_executions
    }

    /// Whether the instance has run anything since it was built
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        let live = self.live.lock();
        live.executions > 0 || live.poisoned.is_some()
    }

    /// Call an exported function with integer arguments
    ///
    /// Arguments are narrowed to the parameter types; the first result, if
    /// any, is widened to `i64`. Runs synchronously on the calling thread.
    ///
    /// # Errors
    ///
    /// `Unhealthy`, `MissingExport`, `Signature`, `FuelExhausted` or `Trap`
    pub fn invoke(&self, export: &str, args: &[i64]) -> SandboxResult<Invocation> {
        let mut live = self.live.lock();
        if let Some(reason) = &live.poisoned {
            return Err(SandboxError::Unhealthy(reason.clone()));
        }
        let Live { store, instance, .. } = &mut *live;
        let func = instance
            .get_func(&mut *store, export)
            .ok_or_else(|| SandboxError::MissingExport(export.to_string()))?;
        let ty = func.ty(&*store);

        let params: Vec<ValType> = ty.params().collect();
        if params.len() != args.len() {
            return Err(signature(export, format!("expects {} arguments, got {}", params.len(), args.len())));
        }
        let mut call_args = Vec::with_capacity(args.len());
        for (param, &arg) in params.iter().zip(args) {
            let val = match param {
                ValType::I32 => Val::I32(
                    i32::try_from(arg).map_err(|_| signature(export, format!("argument {arg} overflows i32")))?,
                ),
                ValType::I64 => Val::I64(arg),
                other => return Err(signature(export, format!("unsupported parameter type {other}"))),
            };
            call_args.push(val);
        }
        let mut results = vec![Val::I32(0); ty.results().len()];

        store
            .set_fuel(self.config.max_fuel)
            .map_err(|e| SandboxError::Engine(e.to_string()))?;
        let started = Instant::now();
        let outcome = func.call(&mut *store, &call_args, &mut results);
        let elapsed_us = started.elapsed().as_micros() as u64;
        let remaining = store.get_fuel().unwrap_or(0);
        let fuel_consumed = self.config.max_fuel.saturating_sub(remaining);
        live.executions += 1;

        if let Err(err) = outcome {
            let exhausted = err.downcast_ref::<Trap>() == Some(&Trap::OutOfFuel);
            self.fuel.lock().record(fuel_consumed, exhausted);
            let error = if exhausted {
                SandboxError::FuelExhausted {
                    limit: self.config.max_fuel,
                }
            } else {
                SandboxError::Trap(format!("{err:#}"))
            };
            warn!(module = %self.module.hash().prefix(12), export, error = %error, "invocation failed");
            live.poisoned = Some(error.to_string());
            return Err(error);
        }
        self.fuel.lock().record(fuel_consumed, false);

        let value = match results.first() {
            None => None,
            Some(Val::I32(v)) => Some(i64::from(*v)),
            Some(Val::I64(v)) => Some(*v),
            Some(_) => return Err(signature(export, "unsupported result type".to_string())),
        };
        debug!(module = %self.module.hash().prefix(12), export, fuel_consumed, elapsed_us, "invocation complete");
        Ok(Invocation {
            export: export.to_string(),
            value,
            fuel_consumed,
            elapsed_us,
        })
    }

    /// Run [`invoke`](Self::invoke) on the blocking thread pool
    ///
    /// # Errors
    ///
    /// Same as `invoke`, plus `Join` if the blocking task panics
    pub async fn invoke_blocking(self: Arc<Self>, export: String, args: Vec<i64>) -> SandboxResult<Invocation> {
        tokio::task::spawn_blocking(move || self.invoke(&export, &args))
            .await
            .map_err(|e| SandboxError::Join(e.to_string()))?
    }

    /// Rebuild the instance, discarding its memory and globals
    ///
    /// # Errors
    ///
    /// Returns `Instantiate` if the module can no longer be instantiated
    pub fn reset(&self) -> SandboxResult<()> {
        let fresh = instantiate(&self.module, &self.config)?;
        *self.live.lock() = fresh;
        debug!(module = %self.module.hash().prefix(12), "instance reset");
        Ok(())
    }
}

impl std::fmt::Debug for SandboxRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRuntime")
            .field("module", &self.module.hash().prefix(12))
            .field("executions", &self.executions())
            .finish_non_exhaustive()
    }
}

fn instantiate(module: &CompiledModule, config: &SandboxConfig) -> SandboxResult<Live> {
    let limits = StoreLimitsBuilder::new()
        .memory_size(config.memory_limit)
        .instances(1)
        .build();
    let mut store = Store::new(module.module().engine(), StoreState { limits });
    store.limiter(|state| &mut state.limits);
    store
        .set_fuel(config.max_fuel)
        .map_err(|e| SandboxError::Engine(e.to_string()))?;
    let instance =
        Instance::new(&mut store, module.module(), &[]).map_err(|e| SandboxError::Instantiate(format!("{e:#}")))?;
    Ok(Live {
        store,
        instance,
        executions: 0,
        poisoned: None,
    })
}

fn signature(export: &str, reason: String) -> SandboxError {
    SandboxError::Signature {
        export: export.to_string(),
        reason,
    }
}
