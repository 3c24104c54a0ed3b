//! Registry of named pools.
//!
//! The manager holds pools of any resource type behind [`ManagedPool`] and
//! routes acquisitions by [`ResourceKind`]. When several pools serve the
//! same kind, the least utilized one is picked.

use crate::error::{PoolError, PoolResult};
use crate::lease::{Lease, ReleaseOutcome};
use crate::managed::ManagedPool;
use crate::stats::{DrainReport, HealthReport, PoolStats};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use qflow_core::ResourceKind;
use qflow_events::PeriodicTask;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared pool registry
#[derive(Clone, Default)]
pub struct PoolManager {
    pools: Arc<DashMap<String, Arc<dyn ManagedPool>>>,
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("pools", &self.names())
            .finish()
    }
}

impl PoolManager {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool under its name
    ///
    /// # Errors
    ///
    /// Returns `DuplicatePool` if the name is taken
    pub fn register(&self, pool: Arc<dyn ManagedPool>) -> PoolResult<()> {
        let name = pool.name().to_string();
        match self.pools.entry(name.clone()) {
            Entry::Occupied(_) => Err(PoolError::DuplicatePool { name }),
            Entry::Vacant(slot) => {
                info!(pool = %name, kind = %pool.kind(), "pool registered");
                slot.insert(pool);
                Ok(())
            }
        }
    }

    /// Look up a pool by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ManagedPool>> {
        self.pools.get(name).map(|p| Arc::clone(p.value()))
    }

    /// Unregister a pool. The pool itself is left running.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn ManagedPool>> {
        self.pools.remove(name).map(|(_, pool)| pool)
    }

    /// Whether a pool is registered under `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    /// Registered pool names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.iter().map(|p| p.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered pools
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether no pools are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Open pools serving `kind`, sorted by name
    #[must_use]
    pub fn pools_of_kind(&self, kind: ResourceKind) -> Vec<Arc<dyn ManagedPool>> {
        let mut pools: Vec<Arc<dyn ManagedPool>> = self
            .pools
            .iter()
            .filter(|p| p.kind() == kind)
            .map(|p| Arc::clone(p.value()))
            .collect();
        pools.sort_by(|a, b| a.name().cmp(b.name()));
        pools
    }

    /// Acquire from the least utilized open pool serving `kind`
    ///
    /// # Errors
    ///
    /// `NoPoolForKind` if nothing serves the kind, otherwise whatever the
    /// chosen pool returns
    pub async fn acquire(&self, kind: ResourceKind) -> PoolResult<Lease> {
        let pool = self
            .pools_of_kind(kind)
            .into_iter()
            .map(|pool| (pool.stats(), pool))
            .filter(|(stats, _)| !stats.closed)
            .min_by(|(a, _), (b, _)| {
                let a_full = a.headroom() == 0 && a.available == 0;
                let b_full = b.headroom() == 0 && b.available == 0;
                a_full
                    .cmp(&b_full)
                    .then_with(|| a.utilization().total_cmp(&b.utilization()))
            })
            .map(|(_, pool)| pool)
            .ok_or(PoolError::NoPoolForKind { kind })?;
        debug!(pool = %pool.name(), kind = %kind, "routing acquisition");
        pool.acquire_lease().await
    }

    /// Return a lease to the pool that issued it
    ///
    /// # Errors
    ///
    /// Returns `UnknownPool` if the issuing pool is no longer registered
    pub async fn release(&self, lease: Lease, outcome: ReleaseOutcome) -> PoolResult<()> {
        let pool = self.get(lease.pool()).ok_or_else(|| PoolError::UnknownPool {
            name: lease.pool().to_string(),
        })?;
        pool.release_lease(lease, outcome).await
    }

    /// Snapshot of every pool, sorted by name
    #[must_use]
    pub fn stats(&self) -> Vec<PoolStats> {
        let mut stats: Vec<PoolStats> = self.pools.iter().map(|p| p.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Mean utilization across open pools that hold at least one resource
    #[must_use]
    pub fn utilization(&self) -> f64 {
        let active: Vec<f64> = self
            .pools
            .iter()
            .map(|p| p.stats())
            .filter(|s| !s.closed && s.available + s.in_use > 0)
            .map(|s| s.utilization())
            .collect();
        if active.is_empty() {
            return 0.0;
        }
        active.iter().sum::<f64>() / active.len() as f64
    }

    /// Run a health sweep on every pool
    pub async fn health_check_all(&self) -> Vec<(String, HealthReport)> {
        let pools: Vec<Arc<dyn ManagedPool>> = self.pools.iter().map(|p| Arc::clone(p.value())).collect();
        let mut reports = Vec::with_capacity(pools.len());
        for pool in pools {
            let report = pool.health_check().await;
            reports.push((pool.name().to_string(), report));
        }
        reports.sort_by(|a, b| a.0.cmp(&b.0));
        reports
    }

    /// Drain and unregister every pool, each bounded by `timeout`
    pub async fn drain_all(&self, timeout: Duration) -> Vec<(String, DrainReport)> {
        let names = self.names();
        let reports = futures::future::join_all(names.into_iter().filter_map(|name| {
            let pool = self.remove(&name)?;
            Some(async move { (name, pool.drain(timeout).await) })
        }))
        .await;
        let forced: usize = reports.iter().map(|(_, r)| r.forced).sum();
        if forced > 0 {
            warn!(forced, "pools drained with resources still in use");
        }
        reports
    }
}

/// Periodic health sweep over every registered pool
#[derive(Debug, Clone)]
pub struct HealthSweep {
    manager: PoolManager,
}

impl HealthSweep {
    /// Sweep the pools in `manager`
    #[must_use]
    pub const fn new(manager: PoolManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl PeriodicTask for HealthSweep {
    fn name(&self) -> &'static str {
        "pool-health-sweep"
    }

    async fn tick(&self) {
        for (pool, report) in self.manager.health_check_all().await {
            if report.destroyed + report.doomed > 0 {
                warn!(pool = %pool, destroyed = report.destroyed, doomed = report.doomed, "unhealthy resources removed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::tests::{TestFactory, TestResource};
    use crate::pool::ResourcePool;
    use std::sync::atomic::Ordering;

    fn pool(name: &str, max: usize) -> ResourcePool<TestFactory> {
        let config = PoolConfig::new(name, ResourceKind::SandboxRuntime)
            .with_bounds(0, max)
            .with_acquisition_timeout(Duration::from_millis(100));
        ResourcePool::new(config, TestFactory::default()).unwrap()
    }

    #[tokio::test]
    async fn test_register_duplicate() {
        let manager = PoolManager::new();
        manager.register(Arc::new(pool("a", 2))).unwrap();
        let err = manager.register(Arc::new(pool("a", 2))).unwrap_err();
        assert_eq!(err, PoolError::DuplicatePool { name: "a".to_string() });
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_by_kind_and_release() {
        let manager = PoolManager::new();
        manager.register(Arc::new(pool("wasm", 2))).unwrap();

        let lease = manager.acquire(ResourceKind::SandboxRuntime).await.unwrap();
        assert_eq!(lease.pool(), "wasm");
        assert!(lease.downcast::<TestResource>().is_some());
        assert_eq!(manager.utilization(), 1.0);

        manager.release(lease, ReleaseOutcome::Success).await.unwrap();
        assert_eq!(manager.stats()[0].available, 1);
        assert_eq!(manager.utilization(), 0.0);

        assert!(matches!(
            manager.acquire(ResourceKind::Connection).await,
            Err(PoolError::NoPoolForKind { .. })
        ));
    }

    #[tokio::test]
    async fn test_acquire_prefers_pool_with_room() {
        let manager = PoolManager::new();
        let a = pool("a", 1);
        let b = pool("b", 1);
        manager.register(Arc::new(a.clone())).unwrap();
        manager.register(Arc::new(b.clone())).unwrap();

        let first = manager.acquire(ResourceKind::SandboxRuntime).await.unwrap();
        let second = manager.acquire(ResourceKind::SandboxRuntime).await.unwrap();
        assert_ne!(first.pool(), second.pool());
        assert_eq!(a.factory().created.load(Ordering::SeqCst), 1);
        assert_eq!(b.factory().created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_to_removed_pool() {
        let manager = PoolManager::new();
        manager.register(Arc::new(pool("gone", 1))).unwrap();
        let lease = manager.acquire(ResourceKind::SandboxRuntime).await.unwrap();
        let removed = manager.remove("gone").unwrap();
        let err = manager.release(lease, ReleaseOutcome::Success).await.unwrap_err();
        assert!(matches!(err, PoolError::UnknownPool { .. }));
        // The dropped lease finds its way home anyway.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(removed.stats().in_use, 0);
    }

    #[tokio::test]
    async fn test_health_sweep_and_drain_all() {
        let manager = PoolManager::new();
        let p = pool("p", 2);
        manager.register(Arc::new(p.clone())).unwrap();
        p.prewarm(2).await;
        p.factory().fail_validation.store(true, Ordering::SeqCst);

        let sweep = HealthSweep::new(manager.clone());
        for _ in 0..3 {
            sweep.tick().await;
        }
        assert_eq!(p.stats().available, 0);

        let reports = manager.drain_all(Duration::from_millis(10)).await;
        assert_eq!(reports.len(), 1);
        assert!(manager.is_empty());
        assert!(p.stats().closed);
    }
}
