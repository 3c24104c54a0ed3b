//! Runtime pool optimizer.
//!
//! Keeps one sandbox pool per module content hash and periodically sizes
//! each pool to its load: busy pools grow, idle pools shrink, and pools
//! about to see hot validation patterns are warmed ahead of time. Every
//! action is kept as a [`PoolOptimization`] record.

use crate::config::{OptimizerConfig, OptimizerConfigPatch, WarmupStrategy};
use crate::error::{OptimizationError, OptimizationResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use qflow_core::{Hash, OptimizationId, ResourceKind, SharedClock};
use qflow_events::{EventBus, PeriodicTask, Topic};
use qflow_heatmap::ValidationHeatmap;
use qflow_pool::{PoolConfig, PoolManager, PoolStats, Pooled, ResourcePool};
use qflow_wasm::{ModuleCache, SandboxFactory, SandboxRuntime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What an optimization did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationKind {
    /// Grew a busy pool
    ScaleUp,
    /// Shrank an idle pool
    ScaleDown,
    /// Warmed ahead of predicted demand
    Prewarm,
    /// Removed least recently used runtimes on request
    Cooldown,
    /// Replaced runtimes with a poor success rate
    Rebalance,
}

/// How an optimization ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    /// The pool changed as intended
    Applied,
    /// Nothing could be changed (bounds, no idle runtimes)
    NoOp,
    /// The pool operation failed
    Failed,
}

/// Record of one scaling action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolOptimization {
    /// Record id
    pub id: OptimizationId,
    /// Module the pool runs
    pub module: Hash,
    /// Pool name
    pub pool: String,
    /// Action taken
    pub kind: OptimizationKind,
    /// Outcome
    pub status: OptimizationStatus,
    /// Utilization when the action was decided
    pub utilization: f64,
    /// Intended change in runtime count
    pub expected_delta: i64,
    /// Observed change in runtime count
    pub actual_delta: i64,
    /// Projected utilization change, or runtimes replaced for rebalances
    pub expected_benefit: f64,
    /// Decision time
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
struct ModulePool {
    pool: ResourcePool<SandboxFactory>,
    layers: Vec<String>,
}

/// Sandbox pools keyed by module hash
pub struct RuntimePoolOptimizer {
    cache: Arc<ModuleCache>,
    pools: DashMap<Hash, ModulePool>,
    clock: SharedClock,
    config: RwLock<OptimizerConfig>,
    history: Mutex<VecDeque<PoolOptimization>>,
    heatmap: Option<Arc<ValidationHeatmap>>,
    manager: Option<PoolManager>,
    events: Option<EventBus>,
}

impl std::fmt::Debug for RuntimePoolOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimePoolOptimizer")
            .field("pools", &self.pools.len())
            .field("config", &*self.config.read())
            .finish_non_exhaustive()
    }
}

impl RuntimePoolOptimizer {
    /// Create an optimizer over `cache`
    pub fn new(cache: Arc<ModuleCache>, config: OptimizerConfig, clock: SharedClock) -> Self {
        Self {
            cache,
            pools: DashMap::new(),
            clock,
            config: RwLock::new(config),
            history: Mutex::new(VecDeque::new()),
            heatmap: None,
            manager: None,
            events: None,
        }
    }

    /// Consult `heatmap` for predictive warm-up
    #[must_use]
    pub fn with_heatmap(mut self, heatmap: Arc<ValidationHeatmap>) -> Self {
        self.heatmap = Some(heatmap);
        self
    }

    /// Register new pools with `manager`
    #[must_use]
    pub fn with_manager(mut self, manager: PoolManager) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Report pool events to `events`
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// The module cache
    #[must_use]
    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.cache
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> OptimizerConfig {
        self.config.read().clone()
    }

    /// Apply a configuration patch
    pub fn update_config(&self, patch: &OptimizerConfigPatch) {
        self.config.write().apply(patch);
        info!(?patch, "optimizer config updated");
    }

    /// Compile `bytes` and give the module a pool warmed to `min_runtimes`.
    /// Registering the same bytes again returns the existing hash.
    ///
    /// `layers` names the validation layers the module serves; hot heatmap
    /// patterns on those layers drive predictive warm-up.
    ///
    /// # Errors
    ///
    /// Compilation errors, or a pool registration conflict
    pub async fn register_module(&self, bytes: &[u8], layers: Vec<String>) -> OptimizationResult<Hash> {
        let module = self.cache.compile(bytes)?;
        let hash = module.hash();
        if self.pools.contains_key(&hash) {
            return Ok(hash);
        }

        let config = self.config();
        let pool_config = PoolConfig::new(pool_name(&hash), ResourceKind::SandboxRuntime)
            .with_bounds(config.min_runtimes, config.max_runtimes.max(1));
        let factory = SandboxFactory::new(module, self.cache.config().clone());
        let pool = match &self.events {
            Some(bus) => ResourcePool::with_events(pool_config, factory, bus.clone())?,
            None => ResourcePool::new(pool_config, factory)?,
        };

        let pool = match self.pools.entry(hash) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Ok(hash),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(ModulePool {
                    pool: pool.clone(),
                    layers,
                });
                pool
            }
        };
        if let Some(manager) = &self.manager {
            manager.register(Arc::new(pool.clone()))?;
        }
        let warmed = pool.prewarm(config.min_runtimes).await;
        info!(module = %hash.prefix(12), warmed, "runtime pool created");
        Ok(hash)
    }

    /// Pool for a module
    #[must_use]
    pub fn pool(&self, module: &Hash) -> Option<ResourcePool<SandboxFactory>> {
        self.pools.get(module).map(|p| p.pool.clone())
    }

    /// Registered module hashes
    #[must_use]
    pub fn modules(&self) -> Vec<Hash> {
        let mut modules: Vec<Hash> = self.pools.iter().map(|p| *p.key()).collect();
        modules.sort();
        modules
    }

    /// Acquire a runtime for `module`
    ///
    /// # Errors
    ///
    /// `UnknownModule`, or the pool's acquisition error
    pub async fn acquire(&self, module: &Hash) -> OptimizationResult<Pooled<SandboxRuntime>> {
        let pool = self.pool(module).ok_or(OptimizationError::UnknownModule(*module))?;
        Ok(pool.acquire().await?)
    }

    /// Statistics for every pool, by module
    #[must_use]
    pub fn pool_stats(&self) -> Vec<(Hash, PoolStats)> {
        let mut stats: Vec<(Hash, PoolStats)> = self.pools.iter().map(|p| (*p.key(), p.pool.stats())).collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Runtimes ready across all pools
    #[must_use]
    pub fn ready_runtimes(&self) -> usize {
        self.pools.iter().map(|p| p.pool.stats().available).sum()
    }

    fn snapshot(&self) -> Vec<(Hash, ModulePool)> {
        let mut pools: Vec<(Hash, ModulePool)> = self.pools.iter().map(|p| (*p.key(), p.value().clone())).collect();
        pools.sort_by(|a, b| a.0.cmp(&b.0));
        pools
    }

    /// One optimization pass over every pool
    pub async fn optimize(&self) -> Vec<PoolOptimization> {
        let config = self.config();
        let mut records = Vec::new();
        for (module, entry) in self.snapshot() {
            let stats = entry.pool.stats();
            if stats.closed {
                continue;
            }
            let utilization = stats.utilization();
            let floor = match config.warmup {
                WarmupStrategy::Lazy => 0,
                WarmupStrategy::Eager => config.min_ready,
                WarmupStrategy::Predictive if self.hot_patterns_waiting(&entry.layers, &config) => config.min_ready,
                WarmupStrategy::Predictive => 0,
            };
            let keep = stats.min_size.max(floor);

            if utilization > config.scale_up_threshold && stats.total() < stats.max_size {
                let step = config.scale_up_step.min(stats.headroom());
                let created = entry.pool.prewarm(step).await;
                let benefit = projected_drop(&stats, step as i64);
                records.push(self.record(&module, &stats, OptimizationKind::ScaleUp, step as i64, created as i64, benefit));
            } else if utilization < config.scale_down_threshold && stats.total() > keep && stats.available > 0 {
                let step = config.scale_down_step.min(stats.total() - keep);
                let destroyed = entry.pool.cooldown(step).await;
                records.push(self.record(
                    &module,
                    &stats,
                    OptimizationKind::ScaleDown,
                    -(step as i64),
                    -(destroyed as i64),
                    destroyed as f64,
                ));
            } else if stats.available < floor {
                let want = (floor - stats.available).min(stats.headroom());
                if want > 0 {
                    let created = entry.pool.prewarm(want).await;
                    let benefit = projected_drop(&stats, want as i64);
                    records.push(self.record(&module, &stats, OptimizationKind::Prewarm, want as i64, created as i64, benefit));
                }
            }

            let replaced = entry.pool.rebalance(config.rebalance_threshold).await;
            if replaced > 0 {
                records.push(self.record(
                    &module,
                    &entry.pool.stats(),
                    OptimizationKind::Rebalance,
                    0,
                    0,
                    replaced as f64,
                ));
            }
        }
        if !records.is_empty() {
            debug!(actions = records.len(), "pool optimization pass");
        }
        records
    }

    fn hot_patterns_waiting(&self, layers: &[String], config: &OptimizerConfig) -> bool {
        let Some(heatmap) = &self.heatmap else {
            return false;
        };
        heatmap
            .hot_unwarmed(config.hot_pattern_threshold)
            .iter()
            .any(|entry| layers.is_empty() || layers.iter().any(|l| entry.key.has_layer(l)))
    }

    /// Create up to `count` runtimes for `module`
    ///
    /// # Errors
    ///
    /// Returns `UnknownModule` if the module has no pool
    pub async fn prewarm(&self, module: &Hash, count: usize) -> OptimizationResult<usize> {
        let pool = self.pool(module).ok_or(OptimizationError::UnknownModule(*module))?;
        let stats = pool.stats();
        let created = pool.prewarm(count).await;
        let benefit = projected_drop(&stats, count as i64);
        self.record(module, &stats, OptimizationKind::Prewarm, count as i64, created as i64, benefit);
        Ok(created)
    }

    /// Spread `count` new runtimes over the busiest pools first.
    /// Returns how many were created.
    pub async fn scale_out(&self, count: usize) -> usize {
        let mut pools = self.snapshot();
        pools.sort_by_key(|(_, p)| std::cmp::Reverse(p.pool.stats().total_acquisitions));
        let mut created = 0;
        for (module, entry) in pools {
            if created >= count {
                break;
            }
            let stats = entry.pool.stats();
            let want = (count - created).min(stats.headroom());
            if want == 0 {
                continue;
            }
            let got = entry.pool.prewarm(want).await;
            self.record(&module, &stats, OptimizationKind::Prewarm, want as i64, got as i64, projected_drop(&stats, want as i64));
            created += got;
        }
        created
    }

    /// Remove up to `count` least recently used idle runtimes for `module`
    ///
    /// # Errors
    ///
    /// Returns `UnknownModule` if the module has no pool
    pub async fn cooldown(&self, module: &Hash, count: usize) -> OptimizationResult<usize> {
        let pool = self.pool(module).ok_or(OptimizationError::UnknownModule(*module))?;
        let stats = pool.stats();
        let destroyed = pool.cooldown(count).await;
        self.record(module, &stats, OptimizationKind::Cooldown, -(count as i64), -(destroyed as i64), destroyed as f64);
        Ok(destroyed)
    }

    /// Replace runtimes of `module` whose success rate is below the threshold
    ///
    /// # Errors
    ///
    /// Returns `UnknownModule` if the module has no pool
    pub async fn rebalance(&self, module: &Hash) -> OptimizationResult<usize> {
        let pool = self.pool(module).ok_or(OptimizationError::UnknownModule(*module))?;
        let threshold = self.config.read().rebalance_threshold;
        let replaced = pool.rebalance(threshold).await;
        self.record(module, &pool.stats(), OptimizationKind::Rebalance, 0, 0, replaced as f64);
        Ok(replaced)
    }

    /// Change the bounds of a module's pool
    ///
    /// # Errors
    ///
    /// `UnknownModule` or `InvalidBounds`
    pub async fn resize(&self, module: &Hash, min: usize, max: usize) -> OptimizationResult<()> {
        let pool = self.pool(module).ok_or(OptimizationError::UnknownModule(*module))?;
        pool.resize(min, max).await?;
        Ok(())
    }

    fn record(
        &self,
        module: &Hash,
        stats: &PoolStats,
        kind: OptimizationKind,
        expected_delta: i64,
        actual_delta: i64,
        expected_benefit: f64,
    ) -> PoolOptimization {
        let status = if actual_delta != 0 || (kind == OptimizationKind::Rebalance && expected_benefit > 0.0) {
            OptimizationStatus::Applied
        } else {
            OptimizationStatus::NoOp
        };
        let record = PoolOptimization {
            id: OptimizationId::new(),
            module: *module,
            pool: stats.name.clone(),
            kind,
            status,
            utilization: stats.utilization(),
            expected_delta,
            actual_delta,
            expected_benefit,
            at: self.clock.now(),
        };
        if actual_delta.signum() != expected_delta.signum() && expected_delta != 0 {
            warn!(pool = %record.pool, ?kind, expected_delta, actual_delta, "optimization had no effect");
        } else {
            info!(pool = %record.pool, ?kind, expected_delta, actual_delta, "pool optimized");
        }
        if kind != OptimizationKind::Rebalance && actual_delta != 0 {
            if let Some(bus) = &self.events {
                bus.emit(
                    Topic::PoolResized,
                    "optimizer",
                    json!({"pool": record.pool, "kind": kind, "delta": actual_delta}),
                );
            }
        }

        let keep = self.config.read().history.max(1);
        let mut history = self.history.lock();
        history.push_back(record.clone());
        while history.len() > keep {
            history.pop_front();
        }
        record
    }

    /// Optimization records, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<PoolOptimization> {
        self.history.lock().iter().cloned().collect()
    }

    /// Fraction of sizing actions whose observed change matched the intent.
    /// 1.0 with no sizing actions on record.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        let history = self.history.lock();
        let sized: Vec<&PoolOptimization> = history.iter().filter(|r| r.expected_delta != 0).collect();
        if sized.is_empty() {
            return 1.0;
        }
        let hits = sized.iter().filter(|r| r.actual_delta == r.expected_delta).count();
        hits as f64 / sized.len() as f64
    }

    /// Drain every pool
    pub async fn shutdown(&self, timeout: std::time::Duration) {
        for (module, entry) in self.snapshot() {
            let report = entry.pool.drain(timeout).await;
            debug!(module = %module.prefix(12), destroyed = report.destroyed, "runtime pool drained");
            if let Some(manager) = &self.manager {
                manager.remove(entry.pool.name());
            }
        }
        self.pools.clear();
    }
}

fn pool_name(hash: &Hash) -> String {
    format!("wasm-{}", hash.prefix(12))
}

/// Utilization drop from adding `delta` runtimes
fn projected_drop(stats: &PoolStats, delta: i64) -> f64 {
    let existing = (stats.available + stats.in_use + stats.checking) as f64;
    let after = existing + delta as f64;
    if existing == 0.0 || after <= 0.0 {
        return 0.0;
    }
    stats.utilization() - stats.in_use as f64 / after
}

/// Periodic optimization pass
#[derive(Debug, Clone)]
pub struct OptimizerTask(pub Arc<RuntimePoolOptimizer>);

#[async_trait]
impl PeriodicTask for OptimizerTask {
    fn name(&self) -> &'static str {
        "runtime-pool-optimizer"
    }

    async fn tick(&self) {
        self.0.optimize().await;
    }
}
