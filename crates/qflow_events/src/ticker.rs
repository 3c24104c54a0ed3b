//! Periodic background tasks.
//!
//! Every maintenance loop (pool health sweeps, heatmap decay, prediction
//! generation) implements [`PeriodicTask`]. Tests call `tick()` directly;
//! services hand the task to [`spawn_periodic`] and keep the returned
//! [`TaskHandle`] to stop it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A unit of work run on a fixed period
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    /// Task name used in logs
    fn name(&self) -> &'static str;

    /// Run one iteration. Errors are logged by the implementation.
    async fn tick(&self);
}

/// Handle to a spawned periodic task
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    /// Task name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task loop has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task and wait for the current tick to finish
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.handle.await {
            warn!(task = self.name, error = %err, "periodic task ended abnormally");
        }
    }
}

/// Run `task` every `period` until the handle is stopped or `parent` is cancelled.
///
/// The first tick fires after one full period. A tick that overruns delays
/// the next one instead of bursting.
pub fn spawn_periodic(
    task: Arc<dyn PeriodicTask>,
    period: Duration,
    parent: &CancellationToken,
) -> TaskHandle {
    let token = parent.child_token();
    let loop_token = token.clone();
    let name = task.name();
    let period = period.max(Duration::from_millis(1));

    let handle = tokio::spawn(async move {
        info!(task = name, period_ms = period.as_millis() as u64, "periodic task started");
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = loop_token.cancelled() => break,
                _ = interval.tick() => {
                    debug!(task = name, "tick");
                    task.tick().await;
                }
            }
        }
        info!(task = name, "periodic task stopped");
    });

    TaskHandle { name, token, handle }
}

/// A set of periodic tasks sharing one cancellation root
#[derive(Debug, Default)]
pub struct TaskGroup {
    root: CancellationToken,
    handles: Vec<TaskHandle>,
}

impl TaskGroup {
    /// Create an empty group
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task into the group
    pub fn spawn(&mut self, task: Arc<dyn PeriodicTask>, period: Duration) {
        let handle = spawn_periodic(task, period, &self.root);
        self.handles.push(handle);
    }

    /// Names of the running tasks
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.handles.iter().map(TaskHandle::name).collect()
    }

    /// Number of tasks in the group
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the group is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every task and wait for all of them
    pub async fn shutdown(self) {
        self.root.cancel();
        for handle in self.handles {
            handle.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter(AtomicU32);

    #[async_trait]
    impl PeriodicTask for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn tick(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_ticks_on_period() {
        let counter = Arc::new(Counter(AtomicU32::new(0)));
        let root = CancellationToken::new();
        let handle = spawn_periodic(counter.clone(), Duration::from_secs(10), &root);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_shutdown_stops_all() {
        let a = Arc::new(Counter(AtomicU32::new(0)));
        let b = Arc::new(Counter(AtomicU32::new(0)));
        let mut group = TaskGroup::new();
        group.spawn(a.clone(), Duration::from_secs(1));
        group.spawn(b.clone(), Duration::from_secs(2));
        assert_eq!(group.len(), 2);
        assert_eq!(group.names(), vec!["counter", "counter"]);

        tokio::time::sleep(Duration::from_millis(4500)).await;
        group.shutdown().await;

        let (a_ticks, b_ticks) = (a.0.load(Ordering::SeqCst), b.0.load(Ordering::SeqCst));
        assert_eq!(a_ticks, 4);
        assert_eq!(b_ticks, 2);
    }

    #[tokio::test]
    async fn test_manual_tick() {
        let counter = Counter(AtomicU32::new(0));
        counter.tick().await;
        counter.tick().await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }
}
