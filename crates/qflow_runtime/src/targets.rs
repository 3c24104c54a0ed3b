//! Adapters that point the heatmap and the predictive optimizer at the
//! live pools and component cache.

use async_trait::async_trait;
use qflow_core::ResourceKind;
use qflow_heatmap::{PatternKey, PrewarmError, PrewarmTarget};
use qflow_lazy::LazyLoadingManager;
use qflow_optimize::{Capacity, OptimizationError, OptimizationTarget, RuntimePoolOptimizer};
use qflow_pool::PoolManager;
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::debug;

/// Create up to `count` idle resources of `kind`, busiest pools first
async fn warm_pools(pools: &PoolManager, kind: ResourceKind, count: usize) -> Result<usize, String> {
    let mut targets = pools.pools_of_kind(kind);
    if targets.is_empty() {
        return Err(format!("no {kind} pools registered"));
    }
    targets.sort_by_key(|p| Reverse(p.stats().total_acquisitions));
    let mut created = 0;
    for pool in targets {
        if created >= count {
            break;
        }
        let want = (count - created).min(pool.stats().headroom());
        if want > 0 {
            created += pool.prewarm(want).await;
        }
    }
    Ok(created)
}

/// Heatmap pre-warming against the pools and the component cache
#[derive(Clone)]
pub struct PrewarmBridge {
    pools: PoolManager,
    lazy: LazyLoadingManager,
}

impl PrewarmBridge {
    /// Bridge over `pools` and `lazy`
    #[must_use]
    pub const fn new(pools: PoolManager, lazy: LazyLoadingManager) -> Self {
        Self { pools, lazy }
    }
}

#[async_trait]
impl PrewarmTarget for PrewarmBridge {
    async fn warm_cache(&self, key: &PatternKey, entries: usize) -> Result<(), PrewarmError> {
        let report = self.lazy.preload_top(entries).await;
        debug!(pattern = %key, loaded = report.loaded.len(), failed = report.failed.len(), "cache warmed");
        match report.failed.first() {
            Some((id, reason)) if report.loaded.is_empty() => Err(PrewarmError::new(format!("{id}: {reason}"))),
            _ => Ok(()),
        }
    }

    async fn warm_runtimes(&self, key: &PatternKey, count: usize) -> Result<(), PrewarmError> {
        let created = warm_pools(&self.pools, ResourceKind::SandboxRuntime, count)
            .await
            .map_err(PrewarmError::new)?;
        debug!(pattern = %key, requested = count, created, "runtimes warmed");
        Ok(())
    }

    async fn warm_connections(&self, key: &PatternKey, count: usize) -> Result<(), PrewarmError> {
        // connections are optional, a flow without network steps has none
        match warm_pools(&self.pools, ResourceKind::Connection, count).await {
            Ok(created) => debug!(pattern = %key, requested = count, created, "connections warmed"),
            Err(reason) => debug!(pattern = %key, %reason, "no connections to warm"),
        }
        Ok(())
    }
}

/// Predictive recommendations applied to the runtime pools and the
/// component cache
#[derive(Clone)]
pub struct CapacityBridge {
    optimizer: Arc<RuntimePoolOptimizer>,
    lazy: LazyLoadingManager,
}

impl CapacityBridge {
    /// Bridge over `optimizer` and `lazy`
    #[must_use]
    pub const fn new(optimizer: Arc<RuntimePoolOptimizer>, lazy: LazyLoadingManager) -> Self {
        Self { optimizer, lazy }
    }
}

#[async_trait]
impl OptimizationTarget for CapacityBridge {
    async fn capacity(&self) -> Capacity {
        Capacity {
            runtimes: self.optimizer.ready_runtimes(),
            cache_entries: self.lazy.cache_stats().entries,
        }
    }

    async fn scale_runtimes(&self, count: usize) -> Result<usize, OptimizationError> {
        if self.optimizer.modules().is_empty() {
            return Err(OptimizationError::Target("no runtime pools to scale".to_string()));
        }
        Ok(self.optimizer.scale_out(count).await)
    }

    async fn warm_cache(&self, entries: usize) -> Result<usize, OptimizationError> {
        let report = self.lazy.preload_top(entries).await;
        match report.failed.first() {
            Some((id, reason)) if report.loaded.is_empty() => {
                Err(OptimizationError::Target(format!("component {id} failed to load: {reason}")))
            }
            _ => Ok(report.loaded.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qflow_core::ManualClock;
    use qflow_lazy::{loader_fn, ComponentMetadata, ComponentType, ComponentValue, LazyConfig, LoadError};
    use qflow_optimize::OptimizerConfig;
    use qflow_pool::{PoolConfig, ResourcePool};
    use qflow_wasm::{ModuleCache, SandboxConfig, SandboxFactory};

    const GUEST: &str = r#"(module (func (export "run") (result i32) i32.const 7))"#;

    fn lazy_with(ids: &[&str]) -> LazyLoadingManager {
        let lazy = LazyLoadingManager::new(LazyConfig::default(), Arc::new(ManualClock::starting_now()));
        for (i, id) in ids.iter().enumerate() {
            let metadata = ComponentMetadata::new(*id, ComponentType::Template)
                .with_size(10)
                .with_priority(10 - i as u8);
            lazy.register_component(
                metadata,
                loader_fn(|m: ComponentMetadata| async move { Ok::<ComponentValue, LoadError>(Arc::new(m.id)) }),
            )
            .unwrap();
        }
        lazy
    }

    fn key() -> PatternKey {
        PatternKey::new(["schema"], "abc", "1")
    }

    #[tokio::test]
    async fn test_prewarm_bridge_warms_pools_and_cache() {
        let cache = ModuleCache::new(SandboxConfig::default()).unwrap();
        let module = cache.compile(&wat::parse_str(GUEST).unwrap()).unwrap();
        let pool = ResourcePool::new(
            PoolConfig::new("guest", ResourceKind::SandboxRuntime).with_bounds(0, 3),
            SandboxFactory::new(module, SandboxConfig::default()),
        )
        .unwrap();
        let pools = PoolManager::new();
        pools.register(Arc::new(pool.clone())).unwrap();
        let lazy = lazy_with(&["a", "b", "c"]);
        let bridge = PrewarmBridge::new(pools, lazy.clone());

        bridge.warm_runtimes(&key(), 5).await.unwrap();
        assert_eq!(pool.stats().available, 3);

        bridge.warm_cache(&key(), 2).await.unwrap();
        assert_eq!(lazy.cache_stats().entries, 2);

        bridge.warm_connections(&key(), 2).await.unwrap();
    }

    #[tokio::test]
    async fn test_prewarm_bridge_without_runtime_pools() {
        let bridge = PrewarmBridge::new(PoolManager::new(), lazy_with(&[]));
        let err = bridge.warm_runtimes(&key(), 1).await.unwrap_err();
        assert_eq!(err.to_string(), "no sandbox_runtime pools registered");
    }

    #[tokio::test]
    async fn test_capacity_bridge() {
        let cache = Arc::new(ModuleCache::new(SandboxConfig::default()).unwrap());
        let optimizer = Arc::new(RuntimePoolOptimizer::new(
            cache,
            OptimizerConfig {
                min_runtimes: 1,
                max_runtimes: 4,
                ..OptimizerConfig::default()
            },
            Arc::new(ManualClock::starting_now()),
        ));
        let lazy = lazy_with(&["a", "b"]);
        let bridge = CapacityBridge::new(Arc::clone(&optimizer), lazy);

        assert!(bridge.scale_runtimes(1).await.is_err());
        optimizer
            .register_module(&wat::parse_str(GUEST).unwrap(), vec!["schema".to_string()])
            .await
            .unwrap();
        assert_eq!(bridge.capacity().await, Capacity { runtimes: 1, cache_entries: 0 });

        assert_eq!(bridge.scale_runtimes(2).await.unwrap(), 2);
        assert_eq!(bridge.warm_cache(5).await.unwrap(), 2);
        assert_eq!(bridge.capacity().await, Capacity { runtimes: 3, cache_entries: 2 });
    }
}
