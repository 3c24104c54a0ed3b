//! The Qflow service: one engine wired to the pools, the optimizers, the
//! heatmap and the component cache, plus the background tasks that keep
//! them tuned.

use crate::action::ActionRegistry;
use crate::config::QflowConfig;
use crate::engine::ParallelExecutionEngine;
use crate::error::{EngineError, EngineResult};
use crate::monitor::{ExecutionMonitor, Metrics};
use crate::result::ExecutionResult;
use crate::targets::{CapacityBridge, PrewarmBridge};
use parking_lot::Mutex;
use qflow_core::{Hash, ResourceKind, SharedClock, SystemClock};
use qflow_events::{EventBus, PeriodicTask, TaskGroup};
use qflow_heatmap::{AnalysisTask, DecayTask, HeatmapEntry, PatternKey, UsageSample, ValidationHeatmap};
use qflow_lazy::{CacheStats, Component, ComponentLoader, ComponentMetadata, LazyLoadingManager, PreloadTask};
use qflow_optimize::{
    ExecutionPatternKey, ExecutionRecord, OptimizationRecommendation, OptimizerTask, PredictionTask,
    PredictiveModel, PredictiveOptimizer, RuntimePoolOptimizer, SchedulerTask,
};
use qflow_plan::{ExecutionPlan, FlowDefinition};
use qflow_pool::{HealthSweep, PoolConfig, PoolManager, PoolStats, ResourcePool, TcpConnectionFactory};
use qflow_wasm::ModuleCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Point-in-time view of the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QflowStatus {
    /// Execution counters
    pub metrics: Metrics,
    /// Every registered pool
    pub pools: Vec<PoolStats>,
    /// Idle sandbox runtimes
    pub ready_runtimes: usize,
    /// Component cache counters
    pub cache: CacheStats,
    /// Hottest validation patterns
    pub hottest: Vec<HeatmapEntry>,
    /// Recommendations not yet finished
    pub active_recommendations: Vec<OptimizationRecommendation>,
    /// Prediction accuracy
    pub model: PredictiveModel,
}

/// Execution optimization service
pub struct Qflow {
    config: QflowConfig,
    clock: SharedClock,
    events: EventBus,
    pools: PoolManager,
    optimizer: Arc<RuntimePoolOptimizer>,
    heatmap: Arc<ValidationHeatmap>,
    predictive: Arc<PredictiveOptimizer>,
    lazy: LazyLoadingManager,
    engine: ParallelExecutionEngine,
    monitor: Arc<ExecutionMonitor>,
    tasks: Mutex<Option<TaskGroup>>,
}

impl std::fmt::Debug for Qflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Qflow")
            .field("pools", &self.pools.names())
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Qflow {
    /// Service on the system clock with the built-in actions
    ///
    /// # Errors
    ///
    /// `Sandbox` if the WASM engine cannot be created
    pub fn new(config: QflowConfig) -> EngineResult<Self> {
        Self::build(config, SystemClock::shared(), ActionRegistry::with_builtins())
    }

    /// Service on `clock` with the built-in actions
    ///
    /// # Errors
    ///
    /// `Sandbox` if the WASM engine cannot be created
    pub fn with_clock(config: QflowConfig, clock: SharedClock) -> EngineResult<Self> {
        Self::build(config, clock, ActionRegistry::with_builtins())
    }

    /// Service on `clock` dispatching through `registry`
    ///
    /// # Errors
    ///
    /// `Sandbox` if the WASM engine cannot be created
    pub fn build(config: QflowConfig, clock: SharedClock, registry: ActionRegistry) -> EngineResult<Self> {
        let events = EventBus::new(config.event_capacity);
        let pools = PoolManager::new();
        let cache = Arc::new(ModuleCache::new(config.sandbox.clone())?);
        let lazy = LazyLoadingManager::with_events(config.lazy.clone(), Arc::clone(&clock), events.clone());

        let heatmap = Arc::new(
            ValidationHeatmap::new(
                config.heatmap.clone(),
                Arc::clone(&clock),
                Arc::new(PrewarmBridge::new(pools.clone(), lazy.clone())),
            )
            .with_events(events.clone()),
        );
        let optimizer = Arc::new(
            RuntimePoolOptimizer::new(cache, config.optimizer.clone(), Arc::clone(&clock))
                .with_heatmap(Arc::clone(&heatmap))
                .with_manager(pools.clone())
                .with_events(events.clone()),
        );
        let predictive = Arc::new(
            PredictiveOptimizer::new(
                config.predictive.clone(),
                Arc::clone(&clock),
                Arc::new(CapacityBridge::new(Arc::clone(&optimizer), lazy.clone())),
            )
            .with_events(events.clone()),
        );

        let monitor = Arc::new(ExecutionMonitor::default());
        let engine = ParallelExecutionEngine::new(config.engine.clone(), registry)
            .with_pools(pools.clone())
            .with_events(events.clone());
        engine.add_observer(monitor.clone());

        Ok(Self {
            config,
            clock,
            events,
            pools,
            optimizer,
            heatmap,
            predictive,
            lazy,
            engine,
            monitor,
            tasks: Mutex::new(None),
        })
    }

    /// Plan a flow without running it
    ///
    /// # Errors
    ///
    /// Planning errors
    pub fn plan_flow(&self, flow: &FlowDefinition) -> EngineResult<ExecutionPlan> {
        self.engine.plan(&flow.steps)
    }

    /// Run a flow and feed its outcome to the predictive optimizer and the
    /// heatmap.
    ///
    /// # Errors
    ///
    /// Planning errors, or `FlowAborted` under fail-fast
    pub async fn submit_flow(&self, flow: &FlowDefinition) -> EngineResult<ExecutionResult> {
        let at = self.clock.now();
        let started = tokio::time::Instant::now();
        let result = self.engine.execute(&flow.steps).await;
        if matches!(result, Err(EngineError::Plan(_))) {
            return result;
        }

        let (success, latency_ms) = match &result {
            Ok(result) => (result.success, result.total_ms as f64),
            Err(_) => (false, started.elapsed().as_millis() as f64),
        };
        let runtimes = flow
            .steps
            .iter()
            .filter(|s| s.resource_kind() == Some(ResourceKind::SandboxRuntime))
            .count() as f64;

        self.predictive.record_execution(&ExecutionRecord {
            flow_type: flow.flow_type.clone(),
            at,
            latency_ms,
            resource_usage: runtimes,
            validation_layers: flow.validation_layers.clone(),
            success,
        });
        if !flow.validation_layers.is_empty() {
            let input = serde_json::to_value(&flow.steps).unwrap_or(Value::Null);
            let key = PatternKey::new(
                flow.validation_layers.iter().cloned(),
                &Hash::of_json(&input).to_hex(),
                self.config.policy_version.clone(),
            );
            self.heatmap
                .record_usage(key, UsageSample::new(latency_ms, success).with_resource_usage(runtimes));
        }
        result
    }

    /// Record an execution that ran elsewhere
    pub fn record_execution(&self, record: &ExecutionRecord) -> ExecutionPatternKey {
        self.predictive.record_execution(record)
    }

    /// Register a lazily loaded component
    ///
    /// # Errors
    ///
    /// `Load` if the id is taken
    pub fn register_component(&self, metadata: ComponentMetadata, loader: Arc<dyn ComponentLoader>) -> EngineResult<()> {
        Ok(self.lazy.register_component(metadata, loader)?)
    }

    /// Load a component and its dependencies
    ///
    /// # Errors
    ///
    /// `Load` errors
    pub async fn load_component(&self, id: &str) -> EngineResult<Component> {
        Ok(self.lazy.load_component(id).await?)
    }

    /// Compile a WASM module, give it a runtime pool and route `wasm:{name}`
    /// steps to it
    ///
    /// # Errors
    ///
    /// `Optimization` if the module does not compile or its pool conflicts
    pub async fn register_module(&self, name: &str, bytes: &[u8], layers: Vec<String>) -> EngineResult<Hash> {
        let hash = self.optimizer.register_module(bytes, layers).await?;
        if let Some(pool) = self.optimizer.pool(&hash) {
            self.engine.route(name, pool.name());
        }
        info!(module = name, hash = %hash.prefix(12), "module registered");
        Ok(hash)
    }

    /// Pool outbound TCP connections to `addr` for `net:{name}` and
    /// `http:{name}` steps
    ///
    /// # Errors
    ///
    /// `Pool` for bad bounds or a taken name
    pub fn add_connection_pool(&self, name: &str, addr: &str, min: usize, max: usize) -> EngineResult<()> {
        let config = PoolConfig::new(name, ResourceKind::Connection).with_bounds(min, max);
        let pool = ResourcePool::with_events(config, TcpConnectionFactory::new(addr), self.events.clone())?;
        self.pools.register(Arc::new(pool))?;
        Ok(())
    }

    /// Start the background tasks. Returns false if they already run.
    pub fn start(&self) -> bool {
        let mut slot = self.tasks.lock();
        if slot.is_some() {
            return false;
        }
        let mut tasks = TaskGroup::new();
        let schedule: [(Arc<dyn PeriodicTask>, Duration); 7] = [
            (Arc::new(HealthSweep::new(self.pools.clone())), self.config.health_check_interval()),
            (Arc::new(OptimizerTask(Arc::clone(&self.optimizer))), self.config.optimizer.interval()),
            (Arc::new(DecayTask(Arc::clone(&self.heatmap))), self.config.heatmap.decay_interval()),
            (Arc::new(AnalysisTask(Arc::clone(&self.heatmap))), self.config.heatmap.analysis_interval()),
            (Arc::new(PredictionTask(Arc::clone(&self.predictive))), self.config.predictive.prediction_interval()),
            (Arc::new(SchedulerTask(Arc::clone(&self.predictive))), self.config.predictive.scheduler_interval()),
            (Arc::new(PreloadTask(self.lazy.clone())), self.config.lazy.preload_interval()),
        ];
        for (task, period) in schedule {
            tasks.spawn(task, period);
        }
        info!(tasks = ?tasks.names(), "background tasks started");
        *slot = Some(tasks);
        true
    }

    /// Stop the background tasks and drain every pool
    pub async fn stop(&self) {
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.shutdown().await;
        }
        let timeout = self.config.drain_timeout();
        self.optimizer.shutdown(timeout).await;
        for (pool, report) in self.pools.drain_all(timeout).await {
            if report.forced > 0 {
                warn!(pool, forced = report.forced, "pool drained with resources in use");
            }
        }
        info!("qflow stopped");
    }

    /// Whether the background tasks run
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    /// Current view of the service
    #[must_use]
    pub fn status(&self) -> QflowStatus {
        QflowStatus {
            metrics: self.monitor.metrics(),
            pools: self.pools.stats(),
            ready_runtimes: self.optimizer.ready_runtimes(),
            cache: self.lazy.cache_stats(),
            hottest: self.heatmap.hottest(10),
            active_recommendations: self.predictive.active_recommendations(),
            model: self.predictive.model(),
        }
    }

    /// Configuration the service was built with
    #[must_use]
    pub const fn config(&self) -> &QflowConfig {
        &self.config
    }

    /// Event bus
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Pool registry
    #[must_use]
    pub const fn pools(&self) -> &PoolManager {
        &self.pools
    }

    /// Execution engine
    #[must_use]
    pub const fn engine(&self) -> &ParallelExecutionEngine {
        &self.engine
    }

    /// Runtime pool optimizer
    #[must_use]
    pub const fn optimizer(&self) -> &Arc<RuntimePoolOptimizer> {
        &self.optimizer
    }

    /// Validation heatmap
    #[must_use]
    pub const fn heatmap(&self) -> &Arc<ValidationHeatmap> {
        &self.heatmap
    }

    /// Predictive optimizer
    #[must_use]
    pub const fn predictive(&self) -> &Arc<PredictiveOptimizer> {
        &self.predictive
    }

    /// Component manager
    #[must_use]
    pub const fn lazy(&self) -> &LazyLoadingManager {
        &self.lazy
    }

    /// Execution counters and history
    #[must_use]
    pub const fn monitor(&self) -> &Arc<ExecutionMonitor> {
        &self.monitor
    }
}
