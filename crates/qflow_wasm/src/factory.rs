//! Pool factory for sandbox runtimes.

use crate::compile::CompiledModule;
use crate::config::SandboxConfig;
use crate::sandbox::SandboxRuntime;
use async_trait::async_trait;
use qflow_core::{Hash, ResourceKind};
use qflow_pool::{FactoryError, ResourceFactory};
use tracing::debug;

/// Builds runtimes of one compiled module
#[derive(Debug, Clone)]
pub struct SandboxFactory {
    module: CompiledModule,
    config: SandboxConfig,
}

impl SandboxFactory {
    /// Factory for `module` under `config`
    #[must_use]
    pub const fn new(module: CompiledModule, config: SandboxConfig) -> Self {
        Self { module, config }
    }

    /// Hash of the module the factory instantiates
    #[must_use]
    pub fn module_hash(&self) -> Hash {
        self.module.hash()
    }

    /// The compiled module
    #[must_use]
    pub const fn module(&self) -> &CompiledModule {
        &self.module
    }
}

#[async_trait]
impl ResourceFactory for SandboxFactory {
    type Resource = SandboxRuntime;

    fn kind(&self) -> ResourceKind {
        ResourceKind::SandboxRuntime
    }

    async fn create(&self) -> Result<SandboxRuntime, FactoryError> {
        let module = self.module.clone();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || SandboxRuntime::new(module, config))
            .await
            .map_err(FactoryError::new)?
            .map_err(FactoryError::new)
    }

    async fn destroy(&self, runtime: &SandboxRuntime) {
        debug!(module = %runtime.module_hash().prefix(12), executions = runtime.executions(), "runtime retired");
    }

    async fn validate(&self, runtime: &SandboxRuntime) -> bool {
        runtime.is_healthy()
    }

    async fn reset(&self, runtime: &SandboxRuntime) -> Result<(), FactoryError> {
        if runtime.is_dirty() && (self.config.reset_between_uses || !runtime.is_healthy()) {
            runtime.reset().map_err(FactoryError::new)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::tests::compiled;
    use qflow_pool::{PoolConfig, ReleaseOutcome, ResourcePool};

    fn pool(config: SandboxConfig) -> ResourcePool<SandboxFactory> {
        let (_cache, module) = compiled(&config);
        let pool_config = PoolConfig::new(module.hash().to_hex(), ResourceKind::SandboxRuntime).with_bounds(0, 2);
        ResourcePool::new(pool_config, SandboxFactory::new(module, config)).unwrap()
    }

    #[tokio::test]
    async fn test_pooled_runtime_is_reset_between_uses() {
        let pool = pool(SandboxConfig::default());
        let rt = pool.acquire().await.unwrap();
        assert_eq!(rt.invoke("bump", &[]).unwrap().value, Some(1));
        pool.release(rt, ReleaseOutcome::Success).await;

        let rt = pool.acquire().await.unwrap();
        assert_eq!(rt.invoke("bump", &[]).unwrap().value, Some(1));
        pool.release(rt, ReleaseOutcome::Success).await;
        assert_eq!(pool.stats().total_created, 1);
    }

    #[tokio::test]
    async fn test_trapped_runtime_recovers_without_reset_between_uses() {
        let pool = pool(SandboxConfig::default().with_reset_between_uses(false).with_max_fuel(5_000));
        let rt = pool.acquire().await.unwrap();
        assert!(rt.invoke("spin", &[]).is_err());
        pool.release(rt, ReleaseOutcome::Failure).await;

        let rt = pool.acquire().await.unwrap();
        assert_eq!(rt.invoke("add", &[2, 2]).unwrap().value, Some(4));
        assert_eq!(pool.stats().total_destroyed, 0);
    }

    #[tokio::test]
    async fn test_state_kept_without_reset_between_uses() {
        let pool = pool(SandboxConfig::default().with_reset_between_uses(false));
        let rt = pool.acquire().await.unwrap();
        rt.invoke("bump", &[]).unwrap();
        pool.release(rt, ReleaseOutcome::Success).await;
        let rt = pool.acquire().await.unwrap();
        assert_eq!(rt.invoke("bump", &[]).unwrap().value, Some(2));
    }
}
