//! Component descriptions, handles and loaders.

use crate::error::LoadResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;

/// A loaded component, type-erased
pub type ComponentValue = Arc<dyn Any + Send + Sync>;

/// What a component is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    /// Flow template
    Template,
    /// Compiled sandbox module
    Module,
    /// Validation policy
    Policy,
    /// Schema definition
    Schema,
    /// Anything else
    #[default]
    Other,
}

/// Registration details for a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentMetadata {
    /// Unique id
    pub id: String,
    /// Component type
    #[serde(default)]
    pub component_type: ComponentType,
    /// Expected size in bytes before compression
    #[serde(default)]
    pub estimated_size: usize,
    /// Components to load first
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Preload priority, 0 (never) to 10
    #[serde(default)]
    pub priority: u8,
}

impl ComponentMetadata {
    /// Metadata with defaults for `id`
    pub fn new(id: impl Into<String>, component_type: ComponentType) -> Self {
        Self {
            id: id.into(),
            component_type,
            estimated_size: 0,
            dependencies: Vec::new(),
            priority: 0,
        }
    }

    /// Set the size estimate
    #[must_use]
    pub fn with_size(mut self, bytes: usize) -> Self {
        self.estimated_size = bytes;
        self
    }

    /// Add dependencies
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Set the preload priority (capped at 10)
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self
    }
}

/// Handle to a cached component
#[derive(Clone)]
pub struct Component {
    /// Component id
    pub id: String,
    /// Component type
    pub component_type: ComponentType,
    pub(crate) value: ComponentValue,
}

impl Component {
    /// Typed access to the component, if it is a `T`
    #[must_use]
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("component_type", &self.component_type)
            .finish_non_exhaustive()
    }
}

/// Produces a component on demand
#[async_trait]
pub trait ComponentLoader: Send + Sync + 'static {
    /// Load the component described by `metadata`
    async fn load(&self, metadata: &ComponentMetadata) -> LoadResult<ComponentValue>;
}

/// Loader backed by an async closure
pub struct FnLoader<F>(pub F);

#[async_trait]
impl<F, Fut> ComponentLoader for FnLoader<F>
where
    F: Fn(ComponentMetadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LoadResult<ComponentValue>> + Send + 'static,
{
    async fn load(&self, metadata: &ComponentMetadata) -> LoadResult<ComponentValue> {
        (self.0)(metadata.clone()).await
    }
}

/// Wrap an async closure as a loader
pub fn loader_fn<F, Fut>(f: F) -> Arc<dyn ComponentLoader>
where
    F: Fn(ComponentMetadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LoadResult<ComponentValue>> + Send + 'static,
{
    Arc::new(FnLoader(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_loader_and_downcast() {
        let loader = loader_fn(|meta: ComponentMetadata| async move {
            Ok::<_, crate::error::LoadError>(Arc::new(format!("template {}", meta.id)) as ComponentValue)
        });
        let meta = ComponentMetadata::new("checkout", ComponentType::Template).with_priority(12);
        assert_eq!(meta.priority, 10);
        let value = loader.load(&meta).await.unwrap();
        let component = Component {
            id: meta.id.clone(),
            component_type: meta.component_type,
            value,
        };
        assert_eq!(*component.downcast::<String>().unwrap(), "template checkout");
        assert!(component.downcast::<u32>().is_none());
    }

    #[test]
    fn test_metadata_defaults() {
        let meta: ComponentMetadata = serde_json::from_str(r#"{"id": "s"}"#).unwrap();
        assert_eq!(meta.component_type, ComponentType::Other);
        assert!(meta.dependencies.is_empty());
    }
}
