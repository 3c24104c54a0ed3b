//! In-process publish/subscribe bus.
//!
//! Publishing never blocks and never fails: an event with no subscribers is
//! simply dropped. Each subscriber runs on its own task and every handler
//! invocation is spawned separately, so a handler that errors or panics only
//! loses that one event for that one subscriber.

use crate::event::{Event, Topic};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Error returned by an event handler
#[derive(Debug, thiserror::Error)]
#[error("handler failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Create from any displayable reason
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

/// Something that reacts to events
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Subscriber name used in logs
    fn name(&self) -> &str;

    /// Handle one event
    async fn handle(&self, event: Event) -> Result<(), HandlerError>;
}

/// Which topics a subscriber wants
#[derive(Debug, Clone, Default)]
pub enum TopicFilter {
    /// Every topic
    #[default]
    All,
    /// Only the listed topics
    Only(HashSet<Topic>),
}

impl TopicFilter {
    /// Filter on a fixed list of topics
    pub fn only(topics: impl IntoIterator<Item = Topic>) -> Self {
        Self::Only(topics.into_iter().collect())
    }

    /// Whether the filter accepts a topic
    #[must_use]
    pub fn accepts(&self, topic: Topic) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(&topic),
        }
    }
}

/// Handle to a running subscriber task
#[derive(Debug)]
pub struct Subscription {
    name: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Subscriber name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop delivering events and wait for the subscriber task to exit
    pub async fn unsubscribe(self) {
        self.token.cancel();
        if let Err(err) = self.handle.await {
            warn!(subscriber = %self.name, error = %err, "subscriber task ended abnormally");
        }
    }
}

/// Broadcast event bus
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    published: Arc<AtomicU64>,
}

impl EventBus {
    /// Default channel capacity
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Create a bus with the given channel capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event built from its parts
    pub fn emit(&self, topic: Topic, source: &str, payload: serde_json::Value) {
        self.publish(Event::new(topic, source, payload));
    }

    /// Publish an event
    pub fn publish(&self, event: Event) {
        self.published.fetch_add(1, Ordering::Relaxed);
        // No subscribers is fine; delivery is best-effort.
        if self.sender.send(event).is_err() {
            debug!("event published with no subscribers");
        }
    }

    /// Raw receiver for callers that drive their own loop
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Attach a handler on its own task
    pub fn subscribe_handler(
        &self,
        filter: TopicFilter,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        let mut receiver = self.sender.subscribe();
        let token = CancellationToken::new();
        let name = handler.name().to_string();
        let task_token = token.clone();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = task_token.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(subscriber = %task_name, skipped, "subscriber lagged, events dropped");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                if !filter.accepts(event.topic) {
                    continue;
                }
                let topic = event.topic;
                let handler = Arc::clone(&handler);
                match tokio::spawn(async move { handler.handle(event).await }).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(subscriber = %task_name, topic = %topic, error = %err, "event handler failed");
                    }
                    Err(join) if join.is_panic() => {
                        warn!(subscriber = %task_name, topic = %topic, "event handler panicked");
                    }
                    Err(join) => {
                        debug!(subscriber = %task_name, error = %join, "event handler cancelled");
                    }
                }
            }
        });

        Subscription { name, token, handle }
    }

    /// Number of live receivers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Total events published since creation
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Recorder {
        seen: Mutex<Vec<Topic>>,
        fail_on: Option<Topic>,
        panic_on: Option<Topic>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn handle(&self, event: Event) -> Result<(), HandlerError> {
            if self.panic_on == Some(event.topic) {
                panic!("boom");
            }
            self.seen.lock().unwrap().push(event.topic);
            if self.fail_on == Some(event.topic) {
                return Err(HandlerError::new("nope"));
            }
            Ok(())
        }
    }

    fn recorder(fail_on: Option<Topic>, panic_on: Option<Topic>) -> Arc<Recorder> {
        Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail_on,
            panic_on,
        })
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.emit(Topic::PoolCreated, "test", json!({}));
        assert_eq!(bus.published_count(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_raw_subscribe_receives() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(Topic::StepStarted, "engine", json!({"step": "a"}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, Topic::StepStarted);
        assert_eq!(event.field_str("step"), Some("a"));
    }

    #[tokio::test]
    async fn test_handler_filter() {
        let bus = EventBus::new(16);
        let rec = recorder(None, None);
        let sub = bus.subscribe_handler(TopicFilter::only([Topic::StepFailed]), rec.clone());

        bus.emit(Topic::StepStarted, "engine", json!({}));
        bus.emit(Topic::StepFailed, "engine", json!({}));
        settle().await;

        assert_eq!(*rec.seen.lock().unwrap(), vec![Topic::StepFailed]);
        sub.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_handler_errors_and_panics_are_isolated() {
        let bus = EventBus::new(16);
        let faulty = recorder(Some(Topic::StepStarted), Some(Topic::GroupStarted));
        let healthy = recorder(None, None);
        let sub_a = bus.subscribe_handler(TopicFilter::All, faulty.clone());
        let sub_b = bus.subscribe_handler(TopicFilter::All, healthy.clone());

        bus.emit(Topic::GroupStarted, "engine", json!({}));
        bus.emit(Topic::StepStarted, "engine", json!({}));
        bus.emit(Topic::StepCompleted, "engine", json!({}));
        settle().await;

        // The faulty subscriber keeps running after a panic and an error.
        assert_eq!(
            *faulty.seen.lock().unwrap(),
            vec![Topic::StepStarted, Topic::StepCompleted]
        );
        assert_eq!(
            *healthy.seen.lock().unwrap(),
            vec![Topic::GroupStarted, Topic::StepStarted, Topic::StepCompleted]
        );

        sub_a.unsubscribe().await;
        sub_b.unsubscribe().await;
    }

    #[test]
    fn test_topic_filter() {
        assert!(TopicFilter::All.accepts(Topic::ComponentLoaded));
        let only = TopicFilter::only([Topic::ComponentLoaded]);
        assert!(only.accepts(Topic::ComponentLoaded));
        assert!(!only.accepts(Topic::ComponentEvicted));
    }
}
