//! Event Bus - in-process publish/subscribe with bounded history
//!
//! Every subscription owns an unbounded queue drained by its own tokio task,
//! so `publish` never waits on a handler, each subscriber sees a topic's
//! messages in publish order, and a failing handler cannot starve the others.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::Message;

use super::config::BusConfig;
use super::handler::Handler;
use super::history::{History, HistoryEntry};
use super::topics::targeted;

/// Errors rejected at publish/subscribe time
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("Message has no topic")]
    MissingTopic,

    #[error("Message has no id")]
    MissingId,

    #[error("No tokio runtime available to drive the subscriber")]
    NoRuntime,
}

/// Identifies one subscription for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Snapshot of bus counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusMetrics {
    pub published: u64,
    pub delivered: u64,
    /// Publishes that reached no topic subscriber
    pub dropped: u64,
    pub handler_faults: u64,
    pub subscriptions: usize,
    pub history_len: usize,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    handler_faults: AtomicU64,
}

/// A message together with the topic it was published on
#[derive(Debug, Clone)]
pub struct Tapped {
    pub topic: String,
    pub message: Arc<Message>,
}

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<Arc<Message>>,
}

struct Tap {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<Tapped>,
}

#[derive(Default)]
struct Subscribers {
    by_topic: HashMap<String, Vec<Subscriber>>,
    wildcard: Vec<Subscriber>,
    taps: Vec<Tap>,
}

impl Subscribers {
    fn count(&self) -> usize {
        let live = |subs: &Vec<Subscriber>| subs.iter().filter(|s| !s.tx.is_closed()).count();
        self.by_topic.values().map(live).sum::<usize>()
            + live(&self.wildcard)
            + self.taps.iter().filter(|t| !t.tx.is_closed()).count()
    }

    /// Drop subscribers whose receiving side is gone; returns how many
    fn prune_closed(&mut self) -> usize {
        let before = self.count_all();
        self.by_topic.retain(|_, subs| {
            subs.retain(|s| !s.tx.is_closed());
            !subs.is_empty()
        });
        self.wildcard.retain(|s| !s.tx.is_closed());
        self.taps.retain(|t| !t.tx.is_closed());
        before - self.count_all()
    }

    fn count_all(&self) -> usize {
        self.by_topic.values().map(Vec::len).sum::<usize>() + self.wildcard.len() + self.taps.len()
    }
}

/// In-process publish/subscribe transport
pub struct EventBus {
    subscribers: RwLock<Subscribers>,
    history: Mutex<History>,
    next_id: AtomicU64,
    counters: Arc<Counters>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new(config: &BusConfig) -> Self {
        debug!(capacity = config.history_capacity, "EventBus::new: creating event bus");
        Self {
            subscribers: RwLock::new(Subscribers::default()),
            history: Mutex::new(History::new(config.history_capacity)),
            next_id: AtomicU64::new(1),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Publish `message` on `topic`
    ///
    /// Delivered to every subscriber of `topic`, to subscribers of
    /// `topic:targetId` when the message is targeted, and to wildcard taps.
    /// Subscriber failures never surface here.
    pub fn publish(&self, topic: &str, message: Message) -> Result<Arc<Message>, BusError> {
        if topic.trim().is_empty() {
            return Err(BusError::MissingTopic);
        }
        if message.id.trim().is_empty() {
            return Err(BusError::MissingId);
        }
        debug!(%topic, message_id = %message.id, target_id = ?message.target_id, "EventBus::publish");

        let message = Arc::new(message);
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(topic, message.clone());

        let subscribers = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
        let mut delivery = Delivery::default();

        if let Some(subs) = subscribers.by_topic.get(topic) {
            delivery.add(deliver(subs, &message));
        }
        if let Some(target_id) = message.target_id.as_deref()
            && let Some(subs) = subscribers.by_topic.get(&targeted(topic, target_id))
        {
            delivery.add(deliver(subs, &message));
        }
        let delivered = delivery.sent;
        delivery.add(deliver(&subscribers.wildcard, &message));
        delivery.add(deliver_taps(&subscribers.taps, topic, &message));
        drop(subscribers);

        if delivered == 0 {
            debug!(%topic, message_id = %message.id, "EventBus::publish: no subscribers");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.delivered.fetch_add(delivery.sent, Ordering::Relaxed);

        if delivery.closed > 0 {
            let pruned = self
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .prune_closed();
            debug!(pruned, "EventBus::publish: pruned closed subscribers");
        }

        Ok(message)
    }

    /// Publish a message on the topic named by its own `type`
    pub fn emit(&self, message: Message) -> Result<Arc<Message>, BusError> {
        let topic = message.r#type.clone();
        self.publish(&topic, message)
    }

    /// Register `handler` for every message published on `topic`
    ///
    /// Must be called from within a tokio runtime: each subscription is
    /// drained by its own task.
    pub fn subscribe(&self, topic: &str, handler: Arc<dyn Handler>) -> Result<SubscriptionId, BusError> {
        if topic.trim().is_empty() {
            return Err(BusError::MissingTopic);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        let (id, rx) = self.register(Some(topic));
        debug!(%topic, subscription = %id, "EventBus::subscribe");
        runtime.spawn(drive(id, topic.to_string(), rx, handler, self.counters.clone()));
        Ok(id)
    }

    /// Register `handler` for every message on every topic
    pub fn subscribe_all(&self, handler: Arc<dyn Handler>) -> Result<SubscriptionId, BusError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        let (id, rx) = self.register(None);
        debug!(subscription = %id, "EventBus::subscribe_all");
        runtime.spawn(drive(id, "*".to_string(), rx, handler, self.counters.clone()));
        Ok(id)
    }

    /// Subscribe to `topic` and receive messages on a channel instead of a handler
    pub fn subscribe_channel(
        &self,
        topic: &str,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Arc<Message>>), BusError> {
        if topic.trim().is_empty() {
            return Err(BusError::MissingTopic);
        }
        let (id, rx) = self.register(Some(topic));
        debug!(%topic, subscription = %id, "EventBus::subscribe_channel");
        Ok((id, rx))
    }

    /// Receive every published message together with its topic
    ///
    /// Unlike [`subscribe_all`](Self::subscribe_all) the consumer sees the
    /// topic a message was published on, which may differ from its `type`.
    pub fn tap(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Tapped>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .taps
            .push(Tap { id, tx });
        debug!(subscription = %id, "EventBus::tap");
        (id, rx)
    }

    /// Remove a subscription; queued messages are still drained by its task
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        debug!(subscription = %id, "EventBus::unsubscribe");
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);

        let before = subscribers.wildcard.len();
        subscribers.wildcard.retain(|s| s.id != id);
        if subscribers.wildcard.len() != before {
            return true;
        }

        let before = subscribers.taps.len();
        subscribers.taps.retain(|t| t.id != id);
        if subscribers.taps.len() != before {
            return true;
        }

        let mut removed = false;
        subscribers.by_topic.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| s.id != id);
            removed |= subs.len() != before;
            !subs.is_empty()
        });
        removed
    }

    /// Number of live subscriptions on `topic` (excluding wildcard taps)
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_topic
            .get(topic)
            .map_or(0, |subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
    }

    /// Snapshot of the history ring, oldest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).snapshot()
    }

    /// Messages in the history ring that were published on `topic`
    pub fn history_for(&self, topic: &str) -> Vec<Arc<Message>> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .for_topic(topic)
    }

    pub fn metrics(&self) -> BusMetrics {
        BusMetrics {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            handler_faults: self.counters.handler_faults.load(Ordering::Relaxed),
            subscriptions: self.subscribers.read().unwrap_or_else(PoisonError::into_inner).count(),
            history_len: self.history.lock().unwrap_or_else(PoisonError::into_inner).len(),
        }
    }

    fn register(&self, topic: Option<&str>) -> (SubscriptionId, mpsc::UnboundedReceiver<Arc<Message>>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = Subscriber { id, tx };

        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        match topic {
            Some(topic) => subscribers
                .by_topic
                .entry(topic.to_string())
                .or_default()
                .push(subscriber),
            None => subscribers.wildcard.push(subscriber),
        }
        (id, rx)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(&BusConfig::default())
    }
}

#[derive(Debug, Default)]
struct Delivery {
    sent: u64,
    closed: u64,
}

impl Delivery {
    fn add(&mut self, other: Delivery) {
        self.sent += other.sent;
        self.closed += other.closed;
    }
}

fn deliver(subscribers: &[Subscriber], message: &Arc<Message>) -> Delivery {
    let sent = subscribers
        .iter()
        .filter(|s| s.tx.send(message.clone()).is_ok())
        .count() as u64;
    Delivery {
        sent,
        closed: subscribers.len() as u64 - sent,
    }
}

fn deliver_taps(taps: &[Tap], topic: &str, message: &Arc<Message>) -> Delivery {
    let sent = taps
        .iter()
        .filter(|t| {
            t.tx.send(Tapped {
                topic: topic.to_string(),
                message: message.clone(),
            })
            .is_ok()
        })
        .count() as u64;
    Delivery {
        sent,
        closed: taps.len() as u64 - sent,
    }
}

/// Drain one subscription's queue, isolating handler faults
async fn drive(
    id: SubscriptionId,
    topic: String,
    mut rx: mpsc::UnboundedReceiver<Arc<Message>>,
    handler: Arc<dyn Handler>,
    counters: Arc<Counters>,
) {
    while let Some(message) = rx.recv().await {
        let message_id = message.id.clone();
        match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                counters.handler_faults.fetch_add(1, Ordering::Relaxed);
                warn!(subscription = %id, %topic, %message_id, error = %e, "Subscriber handler failed");
            }
            Err(_) => {
                counters.handler_faults.fetch_add(1, Ordering::Relaxed);
                warn!(subscription = %id, %topic, %message_id, "Subscriber handler panicked");
            }
        }
    }
    debug!(subscription = %id, %topic, "EventBus: subscription closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::handler_fn;
    use crate::domain::Payload;
    use serde_json::json;
    use std::time::Duration;

    fn bus() -> EventBus {
        EventBus::new(&BusConfig::default())
    }

    struct PanickingHandler;

    #[async_trait::async_trait]
    impl Handler for PanickingHandler {
        async fn handle(&self, _message: Arc<Message>) -> eyre::Result<()> {
            panic!("panicking handler")
        }
    }

    #[tokio::test]
    async fn test_round_trip_delivers_unmodified_message_once() {
        let bus = bus();
        let (_id, mut rx) = bus.subscribe_channel("greeting").unwrap();

        let msg = Message::from_json("greeting", json!({"text": "hello"})).with_sender("a");
        let expected = msg.clone();
        bus.publish("greeting", msg).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(*received, expected);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_targeted_delivery() {
        let bus = bus();
        let (_a, mut all_rx) = bus.subscribe_channel("task_dispatch").unwrap();
        let (_b, mut w1_rx) = bus.subscribe_channel("task_dispatch:w1").unwrap();
        let (_c, mut w2_rx) = bus.subscribe_channel("task_dispatch:w2").unwrap();

        bus.publish("task_dispatch", Message::new("task_dispatch", Payload::new()).with_target("w1"))
            .unwrap();

        assert!(all_rx.recv().await.is_some());
        assert!(w1_rx.recv().await.is_some());
        assert!(w2_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.subscribe(
            "seq",
            handler_fn(move |msg| {
                let seen = seen_clone.clone();
                async move {
                    // Yield so a non-FIFO runner would interleave
                    tokio::task::yield_now().await;
                    seen.lock().unwrap().push(msg.payload["n"].as_u64().unwrap());
                    Ok(())
                }
            }),
        )
        .unwrap();

        for n in 0..50u64 {
            bus.publish("seq", Message::from_json("seq", json!({ "n": n }))).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_handler_fault_is_isolated() {
        let bus = bus();
        bus.subscribe("t", handler_fn(|_msg| async { Err(eyre::eyre!("broken handler")) }))
            .unwrap();
        bus.subscribe("t", Arc::new(PanickingHandler)).unwrap();
        let (_id, mut rx) = bus.subscribe_channel("t").unwrap();

        let result = bus.publish("t", Message::new("t", Payload::new()));
        assert!(result.is_ok());
        assert!(rx.recv().await.is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bus.metrics().handler_faults, 2);
    }

    #[tokio::test]
    async fn test_handler_survives_its_own_fault() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(
            "t",
            handler_fn(move |msg| {
                let tx = tx.clone();
                async move {
                    if msg.bool_field("fail") == Some(true) {
                        return Err(eyre::eyre!("rejected"));
                    }
                    let _ = tx.send(msg.id.clone());
                    Ok(())
                }
            }),
        )
        .unwrap();

        bus.publish("t", Message::from_json("t", json!({"fail": true}))).unwrap();
        let ok = bus.publish("t", Message::from_json("t", json!({"fail": false}))).unwrap();
        assert_eq!(rx.recv().await.unwrap(), ok.id);
    }

    #[test]
    fn test_publish_rejects_malformed_input() {
        let bus = bus();
        assert_eq!(
            bus.publish("  ", Message::new("x", Payload::new())).unwrap_err(),
            BusError::MissingTopic
        );

        let mut msg = Message::new("x", Payload::new());
        msg.id = String::new();
        assert_eq!(bus.publish("x", msg).unwrap_err(), BusError::MissingId);
        assert_eq!(bus.metrics().published, 0);
    }

    #[test]
    fn test_subscribe_outside_runtime_fails() {
        let bus = bus();
        let result = bus.subscribe("t", handler_fn(|_msg| async { Ok(()) }));
        assert_eq!(result.unwrap_err(), BusError::NoRuntime);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = bus();
        let (id, mut rx) = bus.subscribe_channel("t").unwrap();
        assert_eq!(bus.subscriber_count("t"), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count("t"), 0);

        bus.publish("t", Message::new("t", Payload::new())).unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_wildcard_tap_sees_every_topic() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe_all(handler_fn(move |msg| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg.r#type.clone());
                Ok(())
            }
        }))
        .unwrap();

        bus.emit(Message::new("a", Payload::new())).unwrap();
        bus.emit(Message::new("b", Payload::new())).unwrap();

        assert_eq!(rx.recv().await.unwrap(), "a");
        assert_eq!(rx.recv().await.unwrap(), "b");
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = EventBus::new(&BusConfig {
            history_capacity: 2,
            ..Default::default()
        });
        for kind in ["a", "b", "c"] {
            bus.emit(Message::new(kind, Payload::new())).unwrap();
        }

        let topics: Vec<_> = bus.history().into_iter().map(|e| e.topic).collect();
        assert_eq!(topics, vec!["b", "c"]);
        assert_eq!(bus.history_for("a").len(), 0);

        let metrics = bus.metrics();
        assert_eq!(metrics.published, 3);
        assert_eq!(metrics.dropped, 3);
        assert_eq!(metrics.history_len, 2);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let bus = bus();
        let (_id, rx) = bus.subscribe_channel("t").unwrap();
        let (_keep, mut kept_rx) = bus.subscribe_channel("t").unwrap();
        assert_eq!(bus.subscriber_count("t"), 2);

        drop(rx);
        assert_eq!(bus.subscriber_count("t"), 1);
        assert_eq!(bus.metrics().subscriptions, 1);

        bus.publish("t", Message::new("t", Payload::new())).unwrap();
        assert!(kept_rx.recv().await.is_some());

        drop(kept_rx);
        bus.publish("t", Message::new("t", Payload::new())).unwrap();
        assert_eq!(bus.subscriber_count("t"), 0);
        assert_eq!(bus.metrics().subscriptions, 0);
        assert_eq!(bus.metrics().dropped, 1);
    }

    #[tokio::test]
    async fn test_tap_sees_publish_topic() {
        let bus = bus();
        let (id, mut rx) = bus.tap();

        bus.publish("audit", Message::new("task_completed", Payload::new())).unwrap();
        bus.emit(Message::new("task_failed", Payload::new())).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.topic, "audit");
        assert_eq!(first.message.r#type, "task_completed");
        assert_eq!(rx.recv().await.unwrap().topic, "task_failed");

        assert!(bus.unsubscribe(id));
        assert_eq!(bus.metrics().subscriptions, 0);
    }
}
