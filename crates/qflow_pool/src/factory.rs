//! Resource factory contract.

use crate::error::FactoryError;
use async_trait::async_trait;
use qflow_core::ResourceKind;

/// Creates, checks and tears down one kind of pooled resource
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// The pooled resource
    type Resource: Send + Sync + 'static;

    /// Kind of resource produced
    fn kind(&self) -> ResourceKind;

    /// Create a fresh resource
    async fn create(&self) -> Result<Self::Resource, FactoryError>;

    /// Release whatever the resource holds. Called exactly once per resource.
    async fn destroy(&self, resource: &Self::Resource);

    /// Whether the resource is still usable
    async fn validate(&self, resource: &Self::Resource) -> bool;

    /// Return the resource to a clean state between uses
    async fn reset(&self, _resource: &Self::Resource) -> Result<(), FactoryError> {
        Ok(())
    }
}
