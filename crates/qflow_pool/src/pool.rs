//! Generic resource pool.
//!
//! A pool owns every resource it creates. Each resource sits in exactly one
//! place: the idle `available` queue, the `in_use` map, or a transient
//! "checking" slot while it is validated outside the lock. The state mutex
//! is never held across an await; factory calls always run unlocked.
//!
//! Acquirers that find the pool at capacity queue up FIFO and are handed a
//! resource directly by whoever releases next.

use crate::backpressure::BackpressureStatus;
use crate::config::{check_bounds, PoolConfig};
use crate::error::{PoolError, PoolResult};
use crate::factory::ResourceFactory;
use crate::lease::{Lease, Pooled, ReleaseOutcome, ReturnResource};
use crate::stats::{DrainReport, HealthReport, PoolStats, ResourceStats};
use parking_lot::Mutex;
use qflow_core::{ema, ResourceId, ResourceKind, DEFAULT_EMA_ALPHA};
use qflow_events::{EventBus, Topic};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct Entry<R> {
    id: ResourceId,
    resource: Arc<R>,
    created_at: Instant,
    last_used: Option<Instant>,
    uses: u64,
    success_rate: f64,
    healthy: bool,
    consecutive_failures: u32,
    last_error: Option<String>,
    doomed: bool,
}

impl<R> Entry<R> {
    fn new(resource: R) -> Self {
        Self {
            id: ResourceId::new(),
            resource: Arc::new(resource),
            created_at: Instant::now(),
            last_used: None,
            uses: 0,
            success_rate: 1.0,
            healthy: true,
            consecutive_failures: 0,
            last_error: None,
            doomed: false,
        }
    }

    fn record_health(&mut self, ok: bool) {
        if ok {
            self.healthy = true;
            self.consecutive_failures = 0;
        } else {
            self.healthy = false;
            self.consecutive_failures += 1;
            self.last_error = Some("health check failed".to_string());
        }
    }

    fn record_use(&mut self, outcome: ReleaseOutcome) {
        let sample = match outcome {
            ReleaseOutcome::Success => 1.0,
            ReleaseOutcome::Failure => 0.0,
            ReleaseOutcome::Abandoned => return,
        };
        self.uses += 1;
        self.success_rate = ema(self.success_rate, sample, DEFAULT_EMA_ALPHA);
        self.last_used = Some(Instant::now());
    }

    fn stats(&self, in_use: bool, now: Instant) -> ResourceStats {
        ResourceStats {
            id: self.id,
            in_use,
            healthy: self.healthy,
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
            uses: self.uses,
            success_rate: self.success_rate,
            idle_ms: now
                .saturating_duration_since(self.last_used.unwrap_or(self.created_at))
                .as_millis() as u64,
            age_ms: now.saturating_duration_since(self.created_at).as_millis() as u64,
        }
    }
}

struct Handoff<R> {
    id: ResourceId,
    resource: Arc<R>,
}

struct Waiter<R> {
    seq: u64,
    tx: oneshot::Sender<Handoff<R>>,
}

struct PoolState<R> {
    config: PoolConfig,
    /// Back is most recently returned
    available: VecDeque<Entry<R>>,
    in_use: HashMap<ResourceId, Entry<R>>,
    creating: usize,
    checking: usize,
    waiters: VecDeque<Waiter<R>>,
    closed: bool,
    total_created: u64,
    total_destroyed: u64,
    total_acquisitions: u64,
    acquisition_timeouts: u64,
    creation_failures: u64,
}

impl<R> PoolState<R> {
    fn total(&self) -> usize {
        self.available.len() + self.in_use.len() + self.creating + self.checking
    }

    /// Give an entry to the oldest live waiter, or park it as available.
    /// Returns true if a waiter took it.
    fn hand_off(&mut self, mut entry: Entry<R>) -> bool {
        while let Some(waiter) = self.waiters.pop_front() {
            let handoff = Handoff {
                id: entry.id,
                resource: Arc::clone(&entry.resource),
            };
            if waiter.tx.send(handoff).is_ok() {
                entry.last_used = Some(Instant::now());
                self.total_acquisitions += 1;
                self.in_use.insert(entry.id, entry);
                return true;
            }
            // The waiter gave up; try the next one.
        }
        self.available.push_back(entry);
        false
    }
}

struct PoolInner<F: ResourceFactory> {
    name: String,
    kind: ResourceKind,
    factory: F,
    state: Mutex<PoolState<F::Resource>>,
    changed: Notify,
    waiter_seq: AtomicU64,
    events: Option<EventBus>,
}

impl<F: ResourceFactory> PoolInner<F> {
    fn emit(&self, topic: Topic, payload: serde_json::Value) {
        if let Some(bus) = &self.events {
            bus.emit(topic, &self.name, payload);
        }
    }
}

impl<F: ResourceFactory> ReturnResource for PoolInner<F> {
    fn spawn_release(self: Arc<Self>, id: ResourceId, outcome: ReleaseOutcome) {
        let pool = ResourcePool { inner: self };
        tokio::spawn(async move {
            pool.release_id(id, outcome).await;
        });
    }
}

/// `creating` slots held while factory calls run unlocked. Slots a cancelled
/// caller still holds are given back on drop.
struct CreateSlots<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
    held: usize,
}

impl<F: ResourceFactory> CreateSlots<F> {
    fn reserve(inner: &Arc<PoolInner<F>>, state: &mut PoolState<F::Resource>, n: usize) -> Self {
        state.creating += n;
        Self {
            inner: Arc::clone(inner),
            held: n,
        }
    }

    fn settle(&mut self, state: &mut PoolState<F::Resource>) {
        if self.held > 0 {
            self.held -= 1;
            state.creating -= 1;
        }
    }
}

impl<F: ResourceFactory> Drop for CreateSlots<F> {
    fn drop(&mut self) {
        if self.held == 0 {
            return;
        }
        self.inner.state.lock().creating -= self.held;
        debug!(pool = %self.inner.name, slots = self.held, "abandoned creation slots returned");
        self.held = 0;
        self.inner.changed.notify_waiters();
        if tokio::runtime::Handle::try_current().is_ok() {
            let pool = ResourcePool {
                inner: Arc::clone(&self.inner),
            };
            tokio::spawn(async move { pool.replenish_waiters().await });
        }
    }
}

/// Entries taken out of circulation for validation, one `checking` slot
/// each. Entries a cancelled caller leaves behind are re-validated on a
/// spawned task before anyone else sees them.
struct Checking<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
    entries: VecDeque<Entry<F::Resource>>,
}

impl<F: ResourceFactory> Checking<F> {
    fn hold(
        inner: &Arc<PoolInner<F>>,
        state: &mut PoolState<F::Resource>,
        entries: VecDeque<Entry<F::Resource>>,
    ) -> Self {
        state.checking += entries.len();
        Self {
            inner: Arc::clone(inner),
            entries,
        }
    }

    fn front(&self) -> Option<&Entry<F::Resource>> {
        self.entries.front()
    }

    fn next_resource(&self) -> Option<Arc<F::Resource>> {
        self.entries.front().map(|e| Arc::clone(&e.resource))
    }

    fn take(&mut self, state: &mut PoolState<F::Resource>) -> Option<Entry<F::Resource>> {
        let entry = self.entries.pop_front()?;
        state.checking -= 1;
        Some(entry)
    }
}

impl<F: ResourceFactory> Drop for Checking<F> {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let entries = std::mem::take(&mut self.entries);
        if tokio::runtime::Handle::try_current().is_ok() {
            let pool = ResourcePool {
                inner: Arc::clone(&self.inner),
            };
            let rest = Checking {
                inner: Arc::clone(&self.inner),
                entries,
            };
            tokio::spawn(async move { pool.readmit(rest).await });
        } else {
            let mut state = self.inner.state.lock();
            state.checking -= entries.len();
            for entry in entries {
                state.available.push_front(entry);
            }
        }
    }
}

enum Next<'a, F: ResourceFactory> {
    Create(CreateSlots<F>),
    Wait(u64, oneshot::Receiver<Handoff<F::Resource>>),
    Backoff(tokio::sync::futures::Notified<'a>),
}

/// A pool of resources produced by one factory
pub struct ResourcePool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> Clone for ResourcePool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> std::fmt::Debug for ResourcePool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}

impl<F: ResourceFactory> ResourcePool<F> {
    /// Create an empty pool. Resources are created lazily or by `prewarm`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBounds` if the configured bounds are inconsistent
    pub fn new(config: PoolConfig, factory: F) -> PoolResult<Self> {
        Self::build(config, factory, None)
    }

    /// Create a pool that reports to an event bus
    ///
    /// # Errors
    ///
    /// Returns `InvalidBounds` if the configured bounds are inconsistent
    pub fn with_events(config: PoolConfig, factory: F, events: EventBus) -> PoolResult<Self> {
        Self::build(config, factory, Some(events))
    }

    fn build(mut config: PoolConfig, factory: F, events: Option<EventBus>) -> PoolResult<Self> {
        config.validate()?;
        if config.kind != factory.kind() {
            warn!(pool = %config.name, configured = %config.kind, factory = %factory.kind(), "pool kind overridden by factory");
            config.kind = factory.kind();
        }
        let inner = PoolInner {
            name: config.name.clone(),
            kind: config.kind,
            factory,
            state: Mutex::new(PoolState {
                config,
                available: VecDeque::new(),
                in_use: HashMap::new(),
                creating: 0,
                checking: 0,
                waiters: VecDeque::new(),
                closed: false,
                total_created: 0,
                total_destroyed: 0,
                total_acquisitions: 0,
                acquisition_timeouts: 0,
                creation_failures: 0,
            }),
            changed: Notify::new(),
            waiter_seq: AtomicU64::new(0),
            events,
        };
        if let Some(bus) = &inner.events {
            bus.emit(
                Topic::PoolCreated,
                &inner.name,
                json!({"pool": inner.name, "kind": inner.kind.as_str()}),
            );
        }
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Pool name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Resource kind
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.inner.kind
    }

    /// The factory backing the pool
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.inner.state.lock().config.clone()
    }

    fn pooled(&self, id: ResourceId, resource: Arc<F::Resource>) -> Pooled<F::Resource> {
        Pooled {
            id,
            resource,
            pool: self.inner.name.clone(),
            kind: self.inner.kind,
            home: Some(Arc::clone(&self.inner) as Arc<dyn ReturnResource>),
        }
    }

    fn check_out(&self, state: &mut PoolState<F::Resource>, mut entry: Entry<F::Resource>) -> Pooled<F::Resource> {
        entry.last_used = Some(Instant::now());
        state.total_acquisitions += 1;
        let pooled = self.pooled(entry.id, Arc::clone(&entry.resource));
        state.in_use.insert(entry.id, entry);
        pooled
    }

    /// Acquire a resource
    ///
    /// Idle resources are validated before reuse; ones that fail are
    /// destroyed. With nothing idle and room below `max_size` a new resource
    /// is created. Otherwise the caller queues FIFO until a release hands it
    /// a resource or the acquisition timeout passes.
    ///
    /// # Errors
    ///
    /// `AcquisitionTimeout`, `CreationTimeout`, `Creation`, `Backpressure`
    /// or `Closed`.
    pub async fn acquire(&self) -> PoolResult<Pooled<F::Resource>> {
        let inner = &self.inner;
        let timeout = inner.state.lock().config.acquisition_timeout();
        let deadline = Instant::now() + timeout;

        loop {
            let idle = {
                let mut state = inner.state.lock();
                if state.closed {
                    return Err(self.closed_error());
                }
                state
                    .available
                    .pop_back()
                    .map(|entry| Checking::hold(inner, &mut state, VecDeque::from([entry])))
            };

            if let Some(mut held) = idle {
                let candidate = held.front().filter(|e| !e.doomed).map(|e| Arc::clone(&e.resource));
                let usable = match candidate {
                    Some(resource) => inner.factory.validate(&resource).await,
                    None => false,
                };
                let (pooled, rejected) = {
                    let mut state = inner.state.lock();
                    match held.take(&mut state) {
                        Some(entry) if usable && !state.closed => (Some(self.check_out(&mut state, entry)), None),
                        other => (None, other),
                    }
                };
                if let Some(pooled) = pooled {
                    self.emit_acquired(pooled.id, false);
                    return Ok(pooled);
                }
                if let Some(entry) = rejected {
                    self.destroy(entry, "failed validation on acquire").await;
                }
                continue;
            }

            let next = {
                let mut state = inner.state.lock();
                if state.closed {
                    return Err(self.closed_error());
                }
                if state.total() < state.config.max_size {
                    Next::Create(CreateSlots::reserve(inner, &mut state, 1))
                } else {
                    match state.config.backpressure.status(state.waiters.len()) {
                        BackpressureStatus::Ok => {
                            let (tx, rx) = oneshot::channel();
                            let seq = inner.waiter_seq.fetch_add(1, Ordering::Relaxed);
                            state.waiters.push_back(Waiter { seq, tx });
                            Next::Wait(seq, rx)
                        }
                        BackpressureStatus::Reject => {
                            return Err(PoolError::Backpressure {
                                pool: inner.name.clone(),
                                waiters: state.waiters.len(),
                            });
                        }
                        BackpressureStatus::Block => {
                            // Registered under the lock so a wake-up between
                            // here and the await is not lost.
                            Next::Backoff(inner.changed.notified())
                        }
                    }
                }
            };

            match next {
                Next::Create(slot) => return self.create_for_caller(slot).await,
                Next::Wait(seq, rx) => return self.wait_for_handoff(seq, rx, deadline, timeout).await,
                Next::Backoff(notified) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        inner.state.lock().acquisition_timeouts += 1;
                        return Err(self.acquisition_timeout_error(timeout));
                    }
                }
            }
        }
    }

    async fn create_for_caller(&self, mut slot: CreateSlots<F>) -> PoolResult<Pooled<F::Resource>> {
        let inner = &self.inner;
        let creation_timeout = inner.state.lock().config.creation_timeout();
        let created = tokio::time::timeout(creation_timeout, inner.factory.create()).await;

        let (outcome, orphan) = {
            let mut state = inner.state.lock();
            slot.settle(&mut state);
            match created {
                Ok(Ok(resource)) => {
                    state.total_created += 1;
                    let entry = Entry::new(resource);
                    if state.closed {
                        (Err(self.closed_error()), Some(entry))
                    } else {
                        (Ok(self.check_out(&mut state, entry)), None)
                    }
                }
                Ok(Err(err)) => {
                    state.creation_failures += 1;
                    warn!(pool = %inner.name, error = %err, "resource creation failed");
                    let err = PoolError::Creation {
                        pool: inner.name.clone(),
                        reason: err.to_string(),
                    };
                    (Err(err), None)
                }
                Err(_) => {
                    state.creation_failures += 1;
                    let timeout_ms = creation_timeout.as_millis() as u64;
                    warn!(pool = %inner.name, timeout_ms, "resource creation timed out");
                    let err = PoolError::CreationTimeout {
                        pool: inner.name.clone(),
                        timeout_ms,
                    };
                    (Err(err), None)
                }
            }
        };

        if let Some(entry) = orphan {
            self.destroy(entry, "pool closed during creation").await;
        }
        if let Ok(pooled) = &outcome {
            inner.emit(Topic::ResourceCreated, json!({"pool": inner.name, "resource": pooled.id.to_string()}));
            self.emit_acquired(pooled.id, true);
        }
        outcome
    }

    async fn wait_for_handoff(
        &self,
        seq: u64,
        mut rx: oneshot::Receiver<Handoff<F::Resource>>,
        deadline: Instant,
        timeout: Duration,
    ) -> PoolResult<Pooled<F::Resource>> {
        debug!(pool = %self.inner.name, waiter = seq, "waiting for a resource");
        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(handoff)) => {
                self.inner.changed.notify_waiters();
                self.emit_acquired(handoff.id, false);
                Ok(self.pooled(handoff.id, handoff.resource))
            }
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                let still_queued = {
                    let mut state = self.inner.state.lock();
                    let before = state.waiters.len();
                    state.waiters.retain(|w| w.seq != seq);
                    let removed = before != state.waiters.len();
                    if removed {
                        state.acquisition_timeouts += 1;
                    }
                    removed
                };
                self.inner.changed.notify_waiters();
                if still_queued {
                    return Err(self.acquisition_timeout_error(timeout));
                }
                // A release handed us a resource right at the deadline.
                match rx.try_recv() {
                    Ok(handoff) => Ok(self.pooled(handoff.id, handoff.resource)),
                    Err(_) => Err(self.closed_error()),
                }
            }
        }
    }

    /// Return a resource, reporting how its use went
    pub async fn release(&self, mut pooled: Pooled<F::Resource>, outcome: ReleaseOutcome) {
        pooled.disarm();
        if pooled.pool != self.inner.name {
            warn!(pool = %self.inner.name, lease_pool = %pooled.pool, "resource returned to the wrong pool");
            return;
        }
        self.release_id(pooled.id, outcome).await;
    }

    pub(crate) async fn release_id(&self, id: ResourceId, outcome: ReleaseOutcome) {
        let inner = &self.inner;
        let (mut held, reset) = {
            let mut state = inner.state.lock();
            let Some(mut entry) = state.in_use.remove(&id) else {
                debug!(pool = %inner.name, resource = %id, "release of unknown resource ignored");
                return;
            };
            entry.record_use(outcome);
            let reset = state.config.reset_on_release;
            (Checking::hold(inner, &mut state, VecDeque::from([entry])), reset)
        };
        inner.emit(
            Topic::ResourceReleased,
            json!({"pool": inner.name, "resource": id.to_string(), "success": outcome != ReleaseOutcome::Failure}),
        );

        let Some(resource) = held.next_resource() else {
            return;
        };
        let mut keep = held.front().is_some_and(|e| !e.doomed);
        let mut reason = "marked for destruction";
        let mut reset_error = None;
        let mut unhealthy = false;
        if keep && reset {
            if let Err(err) = inner.factory.reset(&resource).await {
                reset_error = Some(err.to_string());
                keep = false;
                reason = "reset failed";
            }
        }
        if keep && !inner.factory.validate(&resource).await {
            unhealthy = true;
            keep = false;
            reason = "failed validation on release";
        }

        let leftover = {
            let mut state = inner.state.lock();
            let Some(mut entry) = held.take(&mut state) else {
                return;
            };
            if reset_error.is_some() {
                entry.last_error = reset_error;
            }
            if unhealthy {
                entry.healthy = false;
            }
            if keep && state.closed {
                keep = false;
                reason = "pool closed";
            }
            // The entry is out of every count here, so keeping it adds one.
            if keep && state.total() >= state.config.max_size {
                keep = false;
                reason = "pool above max size";
            }
            if keep {
                if state.hand_off(entry) {
                    debug!(pool = %inner.name, resource = %id, "resource handed to waiter");
                }
                None
            } else {
                Some(entry)
            }
        };

        let Some(entry) = leftover else {
            inner.changed.notify_waiters();
            return;
        };
        self.destroy(entry, reason).await;
        inner.changed.notify_waiters();
        self.replenish_waiters().await;
    }

    async fn destroy(&self, entry: Entry<F::Resource>, reason: &str) {
        let inner = &self.inner;
        inner.factory.destroy(&entry.resource).await;
        inner.state.lock().total_destroyed += 1;
        debug!(pool = %inner.name, resource = %entry.id, reason, "resource destroyed");
        inner.emit(
            Topic::ResourceDestroyed,
            json!({"pool": inner.name, "resource": entry.id.to_string(), "reason": reason}),
        );
    }

    /// Validate entries a cancelled caller left behind and put the good
    /// ones back in circulation
    async fn readmit(&self, mut held: Checking<F>) {
        let inner = &self.inner;
        while let Some(resource) = held.next_resource() {
            let ok = inner.factory.validate(&resource).await;
            let leftover = {
                let mut state = inner.state.lock();
                let Some(mut entry) = held.take(&mut state) else {
                    break;
                };
                entry.record_health(ok);
                if ok && !entry.doomed && !state.closed && state.total() < state.config.max_size {
                    state.hand_off(entry);
                    None
                } else {
                    Some(entry)
                }
            };
            if let Some(entry) = leftover {
                self.destroy(entry, "failed validation after cancelled check").await;
            }
        }
        inner.changed.notify_waiters();
        self.replenish_waiters().await;
    }

    /// Create resources for queued waiters while there is room
    async fn replenish_waiters(&self) {
        let inner = &self.inner;
        loop {
            let (mut slot, creation_timeout) = {
                let mut state = inner.state.lock();
                if state.closed || state.waiters.is_empty() || state.total() >= state.config.max_size {
                    return;
                }
                let timeout = state.config.creation_timeout();
                (CreateSlots::reserve(inner, &mut state, 1), timeout)
            };
            let created = tokio::time::timeout(creation_timeout, inner.factory.create()).await;
            let (id, orphan) = {
                let mut state = inner.state.lock();
                slot.settle(&mut state);
                let Ok(Ok(resource)) = created else {
                    state.creation_failures += 1;
                    return;
                };
                state.total_created += 1;
                let entry = Entry::new(resource);
                let id = entry.id;
                if state.closed {
                    (id, Some(entry))
                } else {
                    state.hand_off(entry);
                    (id, None)
                }
            };
            if let Some(entry) = orphan {
                self.destroy(entry, "pool closed during creation").await;
                return;
            }
            inner.emit(Topic::ResourceCreated, json!({"pool": inner.name, "resource": id.to_string()}));
        }
    }

    /// Validate every resource
    ///
    /// Idle resources that reach `max_consecutive_failures` are destroyed;
    /// in-use ones are marked and destroyed when released. Only resources
    /// that just passed are handed to queued acquirers. The pool is then
    /// topped back up to `min_size`.
    pub async fn health_check(&self) -> HealthReport {
        let inner = &self.inner;
        let (mut idle, busy, max_failures) = {
            let mut state = inner.state.lock();
            if state.closed {
                return HealthReport::default();
            }
            let drained: VecDeque<Entry<F::Resource>> = state.available.drain(..).collect();
            let idle = Checking::hold(inner, &mut state, drained);
            let busy: Vec<(ResourceId, Arc<F::Resource>)> = state
                .in_use
                .values()
                .filter(|e| !e.doomed)
                .map(|e| (e.id, Arc::clone(&e.resource)))
                .collect();
            (idle, busy, state.config.max_consecutive_failures)
        };

        let mut report = HealthReport::default();
        while let Some(resource) = idle.next_resource() {
            report.checked += 1;
            let ok = inner.factory.validate(&resource).await;
            if !ok {
                report.failed += 1;
            }
            let doomed = {
                let mut state = inner.state.lock();
                let Some(mut entry) = idle.take(&mut state) else {
                    break;
                };
                entry.record_health(ok);
                if entry.consecutive_failures >= max_failures || state.closed {
                    Some(entry)
                } else if ok {
                    state.hand_off(entry);
                    None
                } else {
                    state.available.push_back(entry);
                    None
                }
            };
            if let Some(entry) = doomed {
                self.destroy(entry, "health check failures").await;
                report.destroyed += 1;
            }
        }

        for (id, resource) in busy {
            report.checked += 1;
            let ok = inner.factory.validate(&resource).await;
            if !ok {
                report.failed += 1;
            }
            let mut state = inner.state.lock();
            if let Some(entry) = state.in_use.get_mut(&id) {
                entry.record_health(ok);
                if entry.consecutive_failures >= max_failures && !entry.doomed {
                    entry.doomed = true;
                    report.doomed += 1;
                }
            }
        }

        if report.failed > 0 {
            info!(
                pool = %inner.name,
                checked = report.checked,
                failed = report.failed,
                destroyed = report.destroyed,
                doomed = report.doomed,
                "health sweep found failures"
            );
        }
        if report.destroyed > 0 {
            inner.changed.notify_waiters();
            self.replenish_waiters().await;
        }
        self.ensure_min().await;
        report
    }

    async fn ensure_min(&self) {
        let missing = {
            let state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.config.min_size.saturating_sub(state.total())
        };
        if missing > 0 {
            self.prewarm(missing).await;
        }
    }

    /// Create up to `count` idle resources ahead of demand, within `max_size`.
    /// Returns how many were created.
    pub async fn prewarm(&self, count: usize) -> usize {
        let inner = &self.inner;
        let (mut slots, reserved, creation_timeout) = {
            let mut state = inner.state.lock();
            if state.closed {
                return 0;
            }
            let reserved = count.min(state.config.max_size.saturating_sub(state.total()));
            let timeout = state.config.creation_timeout();
            (CreateSlots::reserve(inner, &mut state, reserved), reserved, timeout)
        };
        if reserved == 0 {
            return 0;
        }

        let results = futures::future::join_all(
            (0..reserved).map(|_| tokio::time::timeout(creation_timeout, inner.factory.create())),
        )
        .await;

        let mut created = Vec::new();
        let mut orphans = Vec::new();
        {
            let mut state = inner.state.lock();
            for result in results {
                slots.settle(&mut state);
                match result {
                    Ok(Ok(resource)) => {
                        state.total_created += 1;
                        let entry = Entry::new(resource);
                        created.push(entry.id);
                        if state.closed {
                            orphans.push(entry);
                        } else {
                            state.hand_off(entry);
                        }
                    }
                    Ok(Err(err)) => {
                        state.creation_failures += 1;
                        warn!(pool = %inner.name, error = %err, "prewarm creation failed");
                    }
                    Err(_) => {
                        state.creation_failures += 1;
                        warn!(pool = %inner.name, "prewarm creation timed out");
                    }
                }
            }
        }
        for entry in orphans {
            self.destroy(entry, "pool closed during creation").await;
        }
        inner.changed.notify_waiters();

        for id in &created {
            inner.emit(Topic::ResourceCreated, json!({"pool": inner.name, "resource": id.to_string()}));
        }
        inner.emit(
            Topic::PoolPrewarmed,
            json!({"pool": inner.name, "requested": count, "created": created.len()}),
        );
        info!(pool = %inner.name, requested = count, created = created.len(), "pool prewarmed");
        created.len()
    }

    /// Destroy up to `count` least recently used idle resources, never going
    /// below `min_size`. Returns how many were destroyed.
    pub async fn cooldown(&self, count: usize) -> usize {
        let victims: Vec<Entry<F::Resource>> = {
            let mut state = self.inner.state.lock();
            let above_min = state.total().saturating_sub(state.config.min_size);
            let n = count.min(above_min).min(state.available.len());
            state.available.drain(..n).collect()
        };
        let destroyed = victims.len();
        for entry in victims {
            self.destroy(entry, "cooldown").await;
        }
        if destroyed > 0 {
            info!(pool = %self.inner.name, destroyed, "pool cooled down");
        }
        destroyed
    }

    /// Replace resources whose rolling success rate is below `threshold`.
    ///
    /// Idle ones are destroyed and recreated now; in-use ones are destroyed
    /// on release. Returns how many resources were flagged.
    pub async fn rebalance(&self, threshold: f64) -> usize {
        let (victims, doomed) = {
            let mut state = self.inner.state.lock();
            let mut victims = Vec::new();
            let mut keep = VecDeque::with_capacity(state.available.len());
            while let Some(entry) = state.available.pop_front() {
                if entry.uses > 0 && entry.success_rate < threshold {
                    victims.push(entry);
                } else {
                    keep.push_back(entry);
                }
            }
            state.available = keep;
            let mut doomed = 0;
            for entry in state.in_use.values_mut() {
                if entry.uses > 0 && entry.success_rate < threshold && !entry.doomed {
                    entry.doomed = true;
                    doomed += 1;
                }
            }
            (victims, doomed)
        };

        let replaced = victims.len();
        for entry in victims {
            self.destroy(entry, "low success rate").await;
        }
        if replaced > 0 {
            self.prewarm(replaced).await;
        }
        if replaced + doomed > 0 {
            info!(pool = %self.inner.name, replaced, doomed, threshold, "pool rebalanced");
        }
        replaced + doomed
    }

    /// Change the bounds and converge on them
    ///
    /// Surplus idle resources are destroyed immediately, surplus in-use ones
    /// on release, and the pool is topped up to the new minimum.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBounds` if `max` is zero or below `min`
    pub async fn resize(&self, min: usize, max: usize) -> PoolResult<()> {
        check_bounds(min, max)?;
        let (surplus, old) = {
            let mut state = self.inner.state.lock();
            let old = (state.config.min_size, state.config.max_size);
            state.config.min_size = min;
            state.config.max_size = max;
            let over = state.total().saturating_sub(max);
            let n = over.min(state.available.len());
            let surplus: Vec<Entry<F::Resource>> = state.available.drain(..n).collect();
            (surplus, old)
        };
        for entry in surplus {
            self.destroy(entry, "pool shrunk").await;
        }
        self.inner.emit(
            Topic::PoolResized,
            json!({"pool": self.inner.name, "old_min": old.0, "old_max": old.1, "min": min, "max": max}),
        );
        info!(pool = %self.inner.name, min, max, "pool resized");
        self.replenish_waiters().await;
        self.ensure_min().await;
        Ok(())
    }

    /// Close the pool
    ///
    /// Queued acquirers are rejected at once. In-use resources get until
    /// `timeout` to come back; after that everything left is destroyed.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let inner = &self.inner;
        let rejected_waiters = {
            let mut state = inner.state.lock();
            state.closed = true;
            let n = state.waiters.len();
            // Dropping the senders wakes every waiter with `Closed`.
            state.waiters.clear();
            n
        };
        inner.changed.notify_waiters();

        let deadline = Instant::now() + timeout;
        loop {
            let notified = inner.changed.notified();
            {
                let state = inner.state.lock();
                if state.in_use.is_empty() && state.checking == 0 {
                    break;
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        let (idle, forced): (Vec<Entry<F::Resource>>, Vec<Entry<F::Resource>>) = {
            let mut state = inner.state.lock();
            let idle = state.available.drain(..).collect();
            let forced = state.in_use.drain().map(|(_, entry)| entry).collect();
            (idle, forced)
        };

        let report = DrainReport {
            destroyed: idle.len() + forced.len(),
            forced: forced.len(),
            rejected_waiters,
        };
        for entry in idle {
            self.destroy(entry, "pool drained").await;
        }
        for entry in forced {
            self.destroy(entry, "pool drained while in use").await;
        }
        info!(
            pool = %inner.name,
            destroyed = report.destroyed,
            forced = report.forced,
            rejected = report.rejected_waiters,
            "pool drained"
        );
        report
    }

    /// Snapshot of the pool
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            name: self.inner.name.clone(),
            kind: self.inner.kind,
            min_size: state.config.min_size,
            max_size: state.config.max_size,
            available: state.available.len(),
            in_use: state.in_use.len(),
            creating: state.creating,
            checking: state.checking,
            waiting: state.waiters.len(),
            total_created: state.total_created,
            total_destroyed: state.total_destroyed,
            total_acquisitions: state.total_acquisitions,
            acquisition_timeouts: state.acquisition_timeouts,
            creation_failures: state.creation_failures,
            closed: state.closed,
        }
    }

    /// Snapshot of every resource, idle first from least recently used
    #[must_use]
    pub fn resource_stats(&self) -> Vec<ResourceStats> {
        let now = Instant::now();
        let state = self.inner.state.lock();
        state
            .available
            .iter()
            .map(|e| e.stats(false, now))
            .chain(state.in_use.values().map(|e| e.stats(true, now)))
            .collect()
    }

    /// Acquire and erase the resource type
    ///
    /// # Errors
    ///
    /// Same as [`ResourcePool::acquire`]
    pub async fn acquire_lease(&self) -> PoolResult<Lease> {
        self.acquire().await.map(Pooled::into_lease)
    }

    /// Return a type-erased lease
    ///
    /// # Errors
    ///
    /// Returns `ForeignLease` if another pool issued the lease
    pub async fn release_lease(&self, mut lease: Lease, outcome: ReleaseOutcome) -> PoolResult<()> {
        if lease.pool != self.inner.name {
            return Err(PoolError::ForeignLease {
                pool: self.inner.name.clone(),
                lease_pool: lease.pool.clone(),
            });
        }
        lease.disarm();
        self.release_id(lease.id, outcome).await;
        Ok(())
    }

    fn emit_acquired(&self, id: ResourceId, fresh: bool) {
        self.inner.emit(
            Topic::ResourceAcquired,
            json!({"pool": self.inner.name, "resource": id.to_string(), "fresh": fresh}),
        );
    }

    fn closed_error(&self) -> PoolError {
        PoolError::Closed {
            pool: self.inner.name.clone(),
        }
    }

    fn acquisition_timeout_error(&self, timeout: Duration) -> PoolError {
        PoolError::AcquisitionTimeout {
            pool: self.inner.name.clone(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backpressure::{BackpressureController, BackpressureStrategy};
    use crate::error::FactoryError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Debug)]
    pub(crate) struct TestResource {
        pub serial: usize,
        pub broken: AtomicBool,
    }

    #[derive(Debug, Default)]
    pub(crate) struct TestFactory {
        pub created: AtomicUsize,
        pub destroyed: parking_lot::Mutex<Vec<usize>>,
        pub create_delay: Option<Duration>,
        pub validate_delay: Option<Duration>,
        pub fail_create: AtomicBool,
        pub fail_validation: AtomicBool,
    }

    #[async_trait]
    impl ResourceFactory for TestFactory {
        type Resource = TestResource;

        fn kind(&self) -> ResourceKind {
            ResourceKind::SandboxRuntime
        }

        async fn create(&self) -> Result<TestResource, FactoryError> {
            if let Some(delay) = self.create_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(FactoryError::new("factory offline"));
            }
            let serial = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(TestResource {
                serial,
                broken: AtomicBool::new(false),
            })
        }

        async fn destroy(&self, resource: &TestResource) {
            self.destroyed.lock().push(resource.serial);
        }

        async fn validate(&self, resource: &TestResource) -> bool {
            if let Some(delay) = self.validate_delay {
                tokio::time::sleep(delay).await;
            }
            !self.fail_validation.load(Ordering::SeqCst) && !resource.broken.load(Ordering::SeqCst)
        }
    }

    fn config(min: usize, max: usize) -> PoolConfig {
        PoolConfig::new("test", ResourceKind::SandboxRuntime)
            .with_bounds(min, max)
            .with_acquisition_timeout(Duration::from_millis(200))
            .with_creation_timeout(Duration::from_millis(100))
    }

    fn pool(min: usize, max: usize) -> ResourcePool<TestFactory> {
        ResourcePool::new(config(min, max), TestFactory::default()).unwrap()
    }

    #[tokio::test]
    async fn test_acquire_creates_then_reuses() {
        let pool = pool(0, 2);
        let a = pool.acquire().await.unwrap();
        let id = a.id();
        assert_eq!(a.serial, 0);
        pool.release(a, ReleaseOutcome::Success).await;

        let b = pool.acquire().await.unwrap();
        assert_eq!(b.id(), id);
        assert_eq!(pool.factory().created.load(Ordering::SeqCst), 1);
        pool.release(b, ReleaseOutcome::Success).await;

        let stats = pool.stats();
        assert_eq!(stats.available, 1);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.total_acquisitions, 2);
    }

    #[tokio::test]
    async fn test_third_acquire_waits_for_release() {
        let pool = pool(0, 2);
        let first = pool.acquire().await.unwrap();
        let _second = pool.acquire().await.unwrap();
        let first_id = first.id();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert_eq!(pool.stats().waiting, 1);

        pool.release(first, ReleaseOutcome::Success).await;
        let third = waiter.await.unwrap().unwrap();
        assert_eq!(third.id(), first_id);
        assert!(!third.broken.load(Ordering::SeqCst));

        let stats = pool.stats();
        assert_eq!(stats.in_use, 2);
        assert_eq!(stats.available, 0);
        assert_eq!(pool.factory().created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_acquisition_timeout() {
        let pool = pool(0, 1);
        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::AcquisitionTimeout { timeout_ms: 200, .. }));
        let stats = pool.stats();
        assert_eq!(stats.acquisition_timeouts, 1);
        assert_eq!(stats.waiting, 0);
    }

    #[tokio::test]
    async fn test_creation_timeout_frees_slot() {
        let factory = TestFactory {
            create_delay: Some(Duration::from_millis(500)),
            ..TestFactory::default()
        };
        let pool = ResourcePool::new(config(0, 1), factory).unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::CreationTimeout { .. }));
        let stats = pool.stats();
        assert_eq!(stats.creating, 0);
        assert_eq!(stats.creation_failures, 1);
    }

    #[tokio::test]
    async fn test_creation_error() {
        let pool = pool(0, 1);
        pool.factory().fail_create.store(true, Ordering::SeqCst);
        assert!(matches!(pool.acquire().await, Err(PoolError::Creation { .. })));
    }

    #[tokio::test]
    async fn test_invalid_release_destroys_exactly_once() {
        let pool = pool(0, 2);
        let res = pool.acquire().await.unwrap();
        res.broken.store(true, Ordering::SeqCst);
        pool.release(res, ReleaseOutcome::Failure).await;

        assert_eq!(*pool.factory().destroyed.lock(), vec![0]);
        let stats = pool.stats();
        assert_eq!(stats.available, 0);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.total_destroyed, 1);

        // A later sweep has nothing left to destroy.
        pool.health_check().await;
        assert_eq!(*pool.factory().destroyed.lock(), vec![0]);
    }

    #[tokio::test]
    async fn test_unhealthy_idle_destroyed_on_acquire() {
        let pool = pool(0, 2);
        let res = pool.acquire().await.unwrap();
        let resource = res.resource();
        pool.release(res, ReleaseOutcome::Success).await;
        resource.broken.store(true, Ordering::SeqCst);

        let fresh = pool.acquire().await.unwrap();
        assert_eq!(fresh.serial, 1);
        assert_eq!(*pool.factory().destroyed.lock(), vec![0]);
    }

    #[tokio::test]
    async fn test_never_exceeds_max_under_contention() {
        let pool = pool(0, 3);
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                let res = pool.acquire().await.unwrap();
                let stats = pool.stats();
                assert!(stats.in_use + stats.available <= 3);
                tokio::time::sleep(Duration::from_millis(2)).await;
                pool.release(res, ReleaseOutcome::Success).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(pool.factory().created.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[tokio::test]
    async fn test_health_check_three_strikes() {
        let pool = pool(0, 2);
        assert_eq!(pool.prewarm(1).await, 1);
        pool.factory().fail_validation.store(true, Ordering::SeqCst);

        let first = pool.health_check().await;
        assert_eq!(first.failed, 1);
        assert_eq!(first.destroyed, 0);
        pool.health_check().await;
        assert_eq!(pool.stats().available, 1);
        assert_eq!(pool.resource_stats()[0].consecutive_failures, 2);

        let third = pool.health_check().await;
        assert_eq!(third.destroyed, 1);
        assert_eq!(pool.stats().available, 0);
    }

    #[tokio::test]
    async fn test_health_check_success_resets_strikes() {
        let pool = pool(0, 2);
        pool.prewarm(1).await;
        pool.factory().fail_validation.store(true, Ordering::SeqCst);
        pool.health_check().await;
        pool.health_check().await;
        pool.factory().fail_validation.store(false, Ordering::SeqCst);
        pool.health_check().await;
        assert_eq!(pool.resource_stats()[0].consecutive_failures, 0);
        assert!(pool.resource_stats()[0].healthy);
    }

    #[tokio::test]
    async fn test_in_use_failures_destroy_on_release() {
        let pool = pool(0, 2);
        let held = pool.acquire().await.unwrap();
        pool.factory().fail_validation.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            pool.health_check().await;
        }
        assert_eq!(pool.stats().in_use, 1);
        pool.factory().fail_validation.store(false, Ordering::SeqCst);

        pool.release(held, ReleaseOutcome::Success).await;
        assert_eq!(*pool.factory().destroyed.lock(), vec![0]);
        assert_eq!(pool.stats().available, 0);
    }

    #[tokio::test]
    async fn test_health_check_tops_up_min() {
        let pool = pool(2, 4);
        let report = pool.health_check().await;
        assert_eq!(report.checked, 0);
        assert_eq!(pool.stats().available, 2);
    }

    #[tokio::test]
    async fn test_prewarm_respects_max() {
        let pool = pool(0, 3);
        assert_eq!(pool.prewarm(10).await, 3);
        assert_eq!(pool.stats().available, 3);
        assert_eq!(pool.prewarm(1).await, 0);
    }

    #[tokio::test]
    async fn test_cooldown_removes_lru_above_min() {
        let pool = pool(1, 4);
        pool.prewarm(3).await;
        // Use serial 2 so it becomes the most recently used.
        let res = loop {
            let res = pool.acquire().await.unwrap();
            if res.serial == 2 {
                break res;
            }
            pool.release(res, ReleaseOutcome::Success).await;
        };
        pool.release(res, ReleaseOutcome::Success).await;

        assert_eq!(pool.cooldown(5).await, 2);
        let remaining = pool.acquire().await.unwrap();
        assert_eq!(remaining.serial, 2);
    }

    #[tokio::test]
    async fn test_rebalance_replaces_failing() {
        let pool = pool(0, 2);
        let res = pool.acquire().await.unwrap();
        let serial = res.serial;
        pool.release(res, ReleaseOutcome::Failure).await;
        for _ in 0..2 {
            let res = pool.acquire().await.unwrap();
            pool.release(res, ReleaseOutcome::Failure).await;
        }
        assert!(pool.resource_stats()[0].success_rate < 0.8);

        assert_eq!(pool.rebalance(0.8).await, 1);
        assert_eq!(*pool.factory().destroyed.lock(), vec![serial]);
        let stats = pool.stats();
        assert_eq!(stats.available, 1);
        assert_eq!(pool.resource_stats()[0].uses, 0);
    }

    #[tokio::test]
    async fn test_resize_shrinks_and_grows() {
        let pool = pool(0, 4);
        pool.prewarm(4).await;
        pool.resize(0, 2).await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.available, 2);
        assert_eq!(stats.max_size, 2);

        pool.resize(3, 5).await.unwrap();
        assert_eq!(pool.stats().available, 3);

        assert!(matches!(pool.resize(3, 1).await, Err(PoolError::InvalidBounds { .. })));
    }

    #[tokio::test]
    async fn test_resize_surplus_in_use_destroyed_on_release() {
        let pool = pool(0, 2);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.resize(0, 1).await.unwrap();
        pool.release(a, ReleaseOutcome::Success).await;
        pool.release(b, ReleaseOutcome::Success).await;
        let stats = pool.stats();
        assert_eq!(stats.available, 1);
        assert_eq!(stats.total_destroyed, 1);
    }

    #[tokio::test]
    async fn test_drain_rejects_waiters_and_forces() {
        let pool = pool(0, 1);
        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = pool.drain(Duration::from_millis(30)).await;
        assert_eq!(report.rejected_waiters, 1);
        assert_eq!(report.forced, 1);
        assert_eq!(report.destroyed, 1);
        assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed { .. })));
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed { .. })));

        // Releasing a force-destroyed resource is a no-op.
        pool.release(held, ReleaseOutcome::Success).await;
        assert_eq!(pool.factory().destroyed.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_waits_for_release() {
        let pool = pool(0, 2);
        let held = pool.acquire().await.unwrap();
        let releaser = {
            let pool = pool.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                pool.release(held, ReleaseOutcome::Success).await;
            })
        };
        let report = pool.drain(Duration::from_secs(2)).await;
        releaser.await.unwrap();
        assert_eq!(report.forced, 0);
        assert_eq!(pool.factory().destroyed.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_backpressure_reject() {
        let cfg = config(0, 1).with_backpressure(BackpressureController::new(1, BackpressureStrategy::Reject));
        let pool = ResourcePool::new(cfg, TestFactory::default()).unwrap();
        let _held = pool.acquire().await.unwrap();
        let queued = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            pool.acquire().await,
            Err(PoolError::Backpressure { waiters: 1, .. })
        ));
        queued.abort();
    }

    #[tokio::test]
    async fn test_backpressure_block_times_out() {
        let cfg = config(0, 1).with_backpressure(BackpressureController::new(1, BackpressureStrategy::Block));
        let pool = ResourcePool::new(cfg, TestFactory::default()).unwrap();
        let _held = pool.acquire().await.unwrap();
        let _queued = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            pool.acquire().await,
            Err(PoolError::AcquisitionTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_handle_returns_to_pool() {
        let pool = pool(0, 1);
        {
            let _res = pool.acquire().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.available, 1);
        // Abandoned releases do not count as uses.
        assert_eq!(pool.resource_stats()[0].uses, 0);
    }

    #[tokio::test]
    async fn test_lease_roundtrip() {
        let pool = pool(0, 1);
        let lease = pool.acquire_lease().await.unwrap();
        assert_eq!(lease.pool(), "test");
        assert_eq!(lease.kind(), ResourceKind::SandboxRuntime);
        let typed = lease.downcast::<TestResource>().unwrap();
        assert_eq!(typed.serial, 0);
        assert!(lease.downcast::<String>().is_none());
        drop(typed);
        pool.release_lease(lease, ReleaseOutcome::Success).await.unwrap();
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let pool = ResourcePool::with_events(config(0, 1), TestFactory::default(), bus).unwrap();
        let res = pool.acquire().await.unwrap();
        pool.release(res, ReleaseOutcome::Success).await;

        let mut topics = Vec::new();
        while let Ok(event) = rx.try_recv() {
            topics.push(event.topic);
        }
        assert_eq!(
            topics,
            vec![
                Topic::PoolCreated,
                Topic::ResourceCreated,
                Topic::ResourceAcquired,
                Topic::ResourceReleased
            ]
        );
    }

    #[tokio::test]
    async fn test_operations_run_on_spawned_tasks() {
        let pool = pool(0, 2);
        let worker = pool.clone();
        let task = tokio::spawn(async move {
            let res = worker.acquire().await?;
            worker.release(res, ReleaseOutcome::Success).await;
            let lease = worker.acquire_lease().await?;
            worker.release_lease(lease, ReleaseOutcome::Failure).await?;
            worker.health_check().await;
            worker.prewarm(1).await;
            worker.rebalance(0.9).await;
            worker.resize(0, 3).await?;
            worker.cooldown(1).await;
            Ok::<_, PoolError>(worker.drain(Duration::from_millis(10)).await)
        });
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.forced, 0);
        assert!(pool.stats().closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_acquire_returns_creation_slot() {
        let factory = TestFactory {
            create_delay: Some(Duration::from_millis(50)),
            ..TestFactory::default()
        };
        let pool = ResourcePool::new(config(0, 1), factory).unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(10), pool.acquire()).await.is_err());
        assert_eq!(pool.stats().creating, 0);

        let res = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().in_use, 1);
        pool.release(res, ReleaseOutcome::Success).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_validation_keeps_resource() {
        let factory = TestFactory {
            validate_delay: Some(Duration::from_millis(50)),
            ..TestFactory::default()
        };
        let pool = ResourcePool::new(config(0, 1), factory).unwrap();
        assert_eq!(pool.prewarm(1).await, 1);
        assert!(tokio::time::timeout(Duration::from_millis(10), pool.acquire()).await.is_err());

        // Re-validated in the background, then back in the idle queue.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = pool.stats();
        assert_eq!(stats.checking, 0);
        assert_eq!(stats.available, 1);

        let res = pool.acquire().await.unwrap();
        assert_eq!(res.serial, 0);
        assert!(pool.factory().destroyed.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_keeps_failing_resource_from_waiters() {
        let factory = TestFactory {
            validate_delay: Some(Duration::from_millis(50)),
            ..TestFactory::default()
        };
        let pool = ResourcePool::new(config(0, 1), factory).unwrap();
        let res = pool.acquire().await.unwrap();
        let resource = res.resource();
        pool.release(res, ReleaseOutcome::Success).await;
        resource.broken.store(true, Ordering::SeqCst);

        let sweep = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.health_check().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.stats().waiting, 1);

        let report = sweep.await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.destroyed, 0);
        assert_eq!(pool.stats().available, 1);
        assert!(matches!(
            waiter.await.unwrap(),
            Err(PoolError::AcquisitionTimeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_hands_validated_resource_to_waiter() {
        let factory = TestFactory {
            validate_delay: Some(Duration::from_millis(50)),
            ..TestFactory::default()
        };
        let pool = ResourcePool::new(config(0, 1), factory).unwrap();
        assert_eq!(pool.prewarm(1).await, 1);

        let sweep = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.health_check().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };

        assert_eq!(sweep.await.unwrap().failed, 0);
        let res = waiter.await.unwrap().unwrap();
        assert_eq!(res.serial, 0);
        assert_eq!(pool.stats().in_use, 1);
    }
}
