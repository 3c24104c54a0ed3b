//! Object-safe view of a pool, so pools of different resource types can
//! sit in one registry.

use crate::error::PoolResult;
use crate::factory::ResourceFactory;
use crate::lease::{Lease, ReleaseOutcome};
use crate::pool::ResourcePool;
use crate::stats::{DrainReport, HealthReport, PoolStats, ResourceStats};
use async_trait::async_trait;
use qflow_core::ResourceKind;
use std::time::Duration;

/// Operations every pool supports regardless of its resource type
#[async_trait]
pub trait ManagedPool: Send + Sync + 'static {
    /// Pool name
    fn name(&self) -> &str;

    /// Resource kind
    fn kind(&self) -> ResourceKind;

    /// Acquire a type-erased lease
    async fn acquire_lease(&self) -> PoolResult<Lease>;

    /// Return a lease
    async fn release_lease(&self, lease: Lease, outcome: ReleaseOutcome) -> PoolResult<()>;

    /// Run a health sweep
    async fn health_check(&self) -> HealthReport;

    /// Change the bounds
    async fn resize(&self, min: usize, max: usize) -> PoolResult<()>;

    /// Create idle resources ahead of demand
    async fn prewarm(&self, count: usize) -> usize;

    /// Destroy least recently used idle resources
    async fn cooldown(&self, count: usize) -> usize;

    /// Replace resources with a poor success rate
    async fn rebalance(&self, threshold: f64) -> usize;

    /// Close the pool
    async fn drain(&self, timeout: Duration) -> DrainReport;

    /// Pool snapshot
    fn stats(&self) -> PoolStats;

    /// Per-resource snapshot
    fn resource_stats(&self) -> Vec<ResourceStats>;
}

#[async_trait]
impl<F: ResourceFactory> ManagedPool for ResourcePool<F> {
    fn name(&self) -> &str {
        ResourcePool::name(self)
    }

    fn kind(&self) -> ResourceKind {
        ResourcePool::kind(self)
    }

    async fn acquire_lease(&self) -> PoolResult<Lease> {
        ResourcePool::acquire_lease(self).await
    }

    async fn release_lease(&self, lease: Lease, outcome: ReleaseOutcome) -> PoolResult<()> {
        ResourcePool::release_lease(self, lease, outcome).await
    }

    async fn health_check(&self) -> HealthReport {
        ResourcePool::health_check(self).await
    }

    async fn resize(&self, min: usize, max: usize) -> PoolResult<()> {
        ResourcePool::resize(self, min, max).await
    }

    async fn prewarm(&self, count: usize) -> usize {
        ResourcePool::prewarm(self, count).await
    }

    async fn cooldown(&self, count: usize) -> usize {
        ResourcePool::cooldown(self, count).await
    }

    async fn rebalance(&self, threshold: f64) -> usize {
        ResourcePool::rebalance(self, threshold).await
    }

    async fn drain(&self, timeout: Duration) -> DrainReport {
        ResourcePool::drain(self, timeout).await
    }

    fn stats(&self) -> PoolStats {
        ResourcePool::stats(self)
    }

    fn resource_stats(&self) -> Vec<ResourceStats> {
        ResourcePool::resource_stats(self)
    }
}
