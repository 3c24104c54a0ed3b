//! Lazy loading manager.
//!
//! Components are registered with a loader and loaded on first use. Each id
//! has at most one load in flight; concurrent callers share its result.
//! Dependencies load before the component that declares them, and a
//! dependency graph that loops is rejected before any loader runs.

use crate::cache::{CacheStats, ComponentCache, NewEntry};
use crate::component::{Component, ComponentLoader, ComponentMetadata};
use crate::config::{LazyConfig, LazyConfigPatch};
use crate::error::{LoadError, LoadResult};
use crate::strategy::{AccessCountStrategy, PreloadCandidate, PreloadStrategy, PriorityStrategy};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use qflow_core::SharedClock;
use qflow_events::{EventBus, PeriodicTask, Topic};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const SOURCE: &str = "lazy-loader";

type InFlight = Shared<BoxFuture<'static, LoadResult<Component>>>;

#[derive(Clone)]
struct Registered {
    metadata: ComponentMetadata,
    loader: Arc<dyn ComponentLoader>,
}

struct Inner {
    registry: DashMap<String, Registered>,
    requests: DashMap<String, u64>,
    cache: Mutex<ComponentCache>,
    inflight: Mutex<HashMap<String, InFlight>>,
    config: RwLock<LazyConfig>,
    strategies: RwLock<Vec<Arc<dyn PreloadStrategy>>>,
    loader_calls: std::sync::atomic::AtomicU64,
    clock: SharedClock,
    events: Option<EventBus>,
}

/// Outcome of a preload pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadReport {
    /// Components now cached
    pub loaded: Vec<String>,
    /// Components that failed, with the reason
    pub failed: Vec<(String, String)>,
}

/// Registry and cache of lazily loaded components
#[derive(Clone)]
pub struct LazyLoadingManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LazyLoadingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyLoadingManager")
            .field("registered", &self.inner.registry.len())
            .field("cached", &self.inner.cache.lock().len())
            .finish_non_exhaustive()
    }
}

impl LazyLoadingManager {
    /// Create a manager with the default preload strategies
    pub fn new(config: LazyConfig, clock: SharedClock) -> Self {
        Self::build(config, clock, None)
    }

    /// Create a manager that reports loads and evictions to `events`
    pub fn with_events(config: LazyConfig, clock: SharedClock, events: EventBus) -> Self {
        Self::build(config, clock, Some(events))
    }

    fn build(config: LazyConfig, clock: SharedClock, events: Option<EventBus>) -> Self {
        let strategies: Vec<Arc<dyn PreloadStrategy>> = vec![
            Arc::new(PriorityStrategy {
                min_priority: config.preload_priority,
            }),
            Arc::new(AccessCountStrategy {
                threshold: config.preload_access_threshold,
            }),
        ];
        Self {
            inner: Arc::new(Inner {
                registry: DashMap::new(),
                requests: DashMap::new(),
                cache: Mutex::new(ComponentCache::new(config.max_cache_size)),
                inflight: Mutex::new(HashMap::new()),
                config: RwLock::new(config),
                strategies: RwLock::new(strategies),
                loader_calls: std::sync::atomic::AtomicU64::new(0),
                clock,
                events,
            }),
        }
    }

    /// Replace the preload strategies
    pub fn set_strategies(&self, strategies: Vec<Arc<dyn PreloadStrategy>>) {
        *self.inner.strategies.write() = strategies;
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> LazyConfig {
        self.inner.config.read().clone()
    }

    /// Apply a configuration patch; a smaller cache evicts at once
    pub fn update_config(&self, patch: &LazyConfigPatch) {
        let max = {
            let mut config = self.inner.config.write();
            config.apply(patch);
            config.max_cache_size
        };
        let evicted = self.inner.cache.lock().resize(max, self.inner.clock.now());
        for id in &evicted {
            self.inner.emit_evicted(id, "resize");
        }
        info!(?patch, evicted = evicted.len(), "lazy loading config updated");
    }

    /// Register a component and its loader
    ///
    /// # Errors
    ///
    /// `DuplicateComponent` if the id is taken
    pub fn register_component(&self, metadata: ComponentMetadata, loader: Arc<dyn ComponentLoader>) -> LoadResult<()> {
        match self.inner.registry.entry(metadata.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(LoadError::DuplicateComponent(metadata.id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(component = %metadata.id, deps = metadata.dependencies.len(), "component registered");
                slot.insert(Registered { metadata, loader });
                Ok(())
            }
        }
    }

    /// Get a component, loading it and its dependencies if needed
    ///
    /// # Errors
    ///
    /// `NotRegistered`, `Cycle`, `Timeout`, `TooLarge`, or the loader's error
    pub async fn load_component(&self, id: &str) -> LoadResult<Component> {
        if !self.inner.registry.contains_key(id) {
            return Err(LoadError::NotRegistered(id.to_string()));
        }
        *self.inner.requests.entry(id.to_string()).or_insert(0) += 1;
        self.check_graph(id)?;
        Inner::load(Arc::clone(&self.inner), id.to_string()).await
    }

    fn check_graph(&self, root: &str) -> LoadResult<()> {
        fn visit(
            registry: &DashMap<String, Registered>,
            id: &str,
            path: &mut Vec<String>,
            done: &mut HashSet<String>,
        ) -> LoadResult<()> {
            if done.contains(id) {
                return Ok(());
            }
            if let Some(at) = path.iter().position(|p| p == id) {
                let mut cycle = path[at..].to_vec();
                cycle.push(id.to_string());
                return Err(LoadError::Cycle(cycle));
            }
            let deps = registry
                .get(id)
                .map(|r| r.metadata.dependencies.clone())
                .ok_or_else(|| LoadError::NotRegistered(id.to_string()))?;
            path.push(id.to_string());
            for dep in &deps {
                visit(registry, dep, path, done)?;
            }
            path.pop();
            done.insert(id.to_string());
            Ok(())
        }

        visit(&self.inner.registry, root, &mut Vec::new(), &mut HashSet::new())
    }

    /// Load components the strategies pick, tolerating failures
    pub async fn preload_components(&self) -> PreloadReport {
        let candidates = self.candidates();
        let strategies = self.inner.strategies.read().clone();
        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for strategy in &strategies {
            let picked = strategy.select(&candidates);
            debug!(strategy = strategy.name(), picked = picked.len(), "preload candidates");
            for id in picked {
                if seen.insert(id.clone()) {
                    selected.push(id);
                }
            }
        }
        self.load_many(selected).await
    }

    /// Load the `n` most wanted components that are not cached yet
    pub async fn preload_top(&self, n: usize) -> PreloadReport {
        let selected = self.candidates().into_iter().take(n).map(|c| c.id).collect();
        self.load_many(selected).await
    }

    async fn load_many(&self, ids: Vec<String>) -> PreloadReport {
        if ids.is_empty() {
            return PreloadReport::default();
        }
        let concurrency = self.config().preload_concurrency.max(1);
        let results: Vec<(String, LoadResult<Component>)> = stream::iter(ids)
            .map(|id| async move {
                let result = Inner::load_checked(self, &id).await;
                (id, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = PreloadReport::default();
        for (id, result) in results {
            match result {
                Ok(_) => report.loaded.push(id),
                Err(e) => {
                    warn!(component = %id, error = %e, "preload failed");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        report.loaded.sort();
        report.failed.sort();
        info!(loaded = report.loaded.len(), failed = report.failed.len(), "preload finished");
        report
    }

    /// Registered, uncached components, highest priority then most
    /// requested first
    #[must_use]
    pub fn candidates(&self) -> Vec<PreloadCandidate> {
        let cache = self.inner.cache.lock();
        let mut candidates: Vec<PreloadCandidate> = self
            .inner
            .registry
            .iter()
            .filter(|r| !cache.contains(r.key()))
            .map(|r| PreloadCandidate {
                id: r.key().clone(),
                priority: r.metadata.priority,
                access_count: self.access_count(r.key()),
                estimated_size: r.metadata.estimated_size,
            })
            .collect();
        drop(cache);
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.access_count.cmp(&a.access_count))
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates
    }

    /// Drop a component from the cache; it stays registered
    pub fn unload(&self, id: &str) -> bool {
        let removed = self.inner.cache.lock().remove(id).is_some();
        if removed {
            self.inner.emit_evicted(id, "unload");
        }
        removed
    }

    /// Cache counters
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.lock().stats()
    }

    /// Whether `id` is cached
    #[must_use]
    pub fn is_loaded(&self, id: &str) -> bool {
        self.inner.cache.lock().contains(id)
    }

    /// Cached ids
    #[must_use]
    pub fn loaded(&self) -> Vec<String> {
        self.inner.cache.lock().ids()
    }

    /// Registration details
    #[must_use]
    pub fn metadata(&self, id: &str) -> Option<ComponentMetadata> {
        self.inner.registry.get(id).map(|r| r.metadata.clone())
    }

    /// Registered ids, sorted
    #[must_use]
    pub fn registered(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.registry.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Times `id` was requested
    #[must_use]
    pub fn access_count(&self, id: &str) -> u64 {
        self.inner.requests.get(id).map_or(0, |n| *n)
    }

    /// Loads in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.inflight.lock().len()
    }

    /// Loader invocations so far
    #[must_use]
    pub fn loader_calls(&self) -> u64 {
        self.inner.loader_calls.load(std::sync::atomic::Ordering::Relaxed)
    }
}

enum Lookup {
    Cached(Component),
    Wait(InFlight),
}

impl Inner {
    async fn load_checked(manager: &LazyLoadingManager, id: &str) -> LoadResult<Component> {
        manager.check_graph(id)?;
        Self::load(Arc::clone(&manager.inner), id.to_string()).await
    }

    fn load(inner: Arc<Self>, id: String) -> BoxFuture<'static, LoadResult<Component>> {
        async move {
            let now = inner.clock.now();
            if let Some(component) = inner.cache.lock().get(&id, now) {
                return Ok(component);
            }
            let lookup = {
                let mut inflight = inner.inflight.lock();
                let mut cache = inner.cache.lock();
                if let Some(component) = cache.get(&id, now) {
                    Lookup::Cached(component)
                } else if let Some(pending) = inflight.get(&id) {
                    Lookup::Wait(pending.clone())
                } else {
                    cache.record_miss();
                    let pending = Self::fetch(Arc::clone(&inner), id.clone()).boxed().shared();
                    inflight.insert(id.clone(), pending.clone());
                    Lookup::Wait(pending)
                }
            };
            match lookup {
                Lookup::Cached(component) => Ok(component),
                Lookup::Wait(pending) => pending.await,
            }
        }
        .boxed()
    }

    async fn fetch(inner: Arc<Self>, id: String) -> LoadResult<Component> {
        let result = Self::fetch_uncached(&inner, &id).await;
        inner.inflight.lock().remove(&id);
        result
    }

    async fn fetch_uncached(inner: &Arc<Self>, id: &str) -> LoadResult<Component> {
        let registered = inner
            .registry
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| LoadError::NotRegistered(id.to_string()))?;
        let metadata = registered.metadata;

        for dep in &metadata.dependencies {
            Self::load(Arc::clone(inner), dep.clone())
                .await
                .map_err(|e| LoadError::Dependency {
                    id: id.to_string(),
                    dependency: dep.clone(),
                    reason: e.to_string(),
                })?;
        }

        let config = inner.config.read().clone();
        let started = Instant::now();
        inner
            .loader_calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let value = match tokio::time::timeout(config.load_timeout(), registered.loader.load(&metadata)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(component = %id, timeout_ms = config.load_timeout_ms, "component load timed out");
                return Err(LoadError::Timeout {
                    id: id.to_string(),
                    timeout_ms: config.load_timeout_ms,
                });
            }
        };
        let load_ms = started.elapsed().as_millis() as u64;

        let (stored_size, compressed) = config.stored_size(metadata.estimated_size);
        let entry = NewEntry {
            id: id.to_string(),
            component_type: metadata.component_type,
            size: metadata.estimated_size,
            stored_size,
            compressed,
            load_ms,
            value,
        }
        .at(inner.clock.now());
        let component = Component {
            id: entry.id.clone(),
            component_type: entry.component_type,
            value: entry.value.clone(),
        };
        let evicted = inner.cache.lock().insert(entry, inner.clock.now())?;

        for victim in &evicted {
            inner.emit_evicted(victim, "capacity");
        }
        info!(component = %id, load_ms, stored_size, compressed, "component loaded");
        if let Some(bus) = &inner.events {
            bus.emit(
                Topic::ComponentLoaded,
                SOURCE,
                json!({
                    "id": id,
                    "type": metadata.component_type,
                    "size": metadata.estimated_size,
                    "stored_size": stored_size,
                    "compressed": compressed,
                    "load_ms": load_ms,
                }),
            );
        }
        Ok(component)
    }

    fn emit_evicted(&self, id: &str, reason: &str) {
        debug!(component = %id, reason, "component evicted");
        if let Some(bus) = &self.events {
            bus.emit(Topic::ComponentEvicted, SOURCE, json!({ "id": id, "reason": reason }));
        }
    }
}

/// Runs the preload strategies
#[derive(Debug, Clone)]
pub struct PreloadTask(pub LazyLoadingManager);

#[async_trait]
impl PeriodicTask for PreloadTask {
    fn name(&self) -> &'static str {
        "lazy-preload"
    }

    async fn tick(&self) {
        self.0.preload_components().await;
    }
}
