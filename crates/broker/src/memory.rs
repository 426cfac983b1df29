//! In-memory topic exchange for tests and single-process deployments.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::broker::{Acknowledger, Broker, BrokerConnector, Delivery, Subscription};
use crate::error::{BrokerError, Result};
use crate::event::{DeliveryMetadata, FulfillmentEvent, decode};
use crate::topic::topic_matches;

/// A message accepted by the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// A message rejected without requeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub queue: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub reason: String,
    pub delivery_count: u32,
}

/// Settings for an [`InMemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryBrokerConfig {
    /// Exchange name, used as the prefix of every queue name.
    pub exchange: String,
    /// How many published messages and dead letters are kept for
    /// inspection. `None` keeps everything.
    pub history_limit: Option<usize>,
}

impl Default for InMemoryBrokerConfig {
    fn default() -> Self {
        Self {
            exchange: "orders".to_string(),
            history_limit: None,
        }
    }
}

/// Append-only log that drops its oldest entries past `limit`.
struct History<T> {
    entries: Mutex<VecDeque<T>>,
    limit: Option<usize>,
}

impl<T: Clone> History<T> {
    fn new(limit: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            limit,
        }
    }

    fn push(&self, entry: T) {
        let mut entries = self.entries.lock();
        if let Some(limit) = self.limit {
            if limit == 0 {
                return;
            }
            while entries.len() >= limit {
                entries.pop_front();
            }
        }
        entries.push_back(entry);
    }

    fn snapshot(&self) -> Vec<T> {
        self.entries.lock().iter().cloned().collect()
    }

    fn filtered(&self, keep: impl Fn(&T) -> bool) -> Vec<T> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| keep(*entry))
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
struct Unacked {
    routing_key: String,
    body: Vec<u8>,
    delivery_count: u32,
}

struct QueueState {
    name: String,
    bindings: Vec<String>,
    sender: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    unacked: Mutex<HashMap<u64, Unacked>>,
    next_tag: AtomicU64,
    dead_letters: Arc<History<DeadLetter>>,
    me: Weak<QueueState>,
}

impl QueueState {
    fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_none_or(|sender| sender.is_closed())
    }

    fn is_bound_to(&self, routing_key: &str) -> bool {
        self.bindings
            .iter()
            .any(|pattern| topic_matches(pattern, routing_key))
    }

    fn sever(&self) {
        self.sender.lock().take();
    }

    fn deliver(&self, routing_key: &str, body: Vec<u8>, delivery_count: u32) -> bool {
        let Some(acker) = self.me.upgrade() else {
            return false;
        };
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return false;
        };

        let delivery_tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        self.unacked.lock().insert(
            delivery_tag,
            Unacked {
                routing_key: routing_key.to_string(),
                body: body.clone(),
                delivery_count,
            },
        );

        let metadata = DeliveryMetadata {
            delivery_tag,
            redelivered: delivery_count > 1,
            routing_key: routing_key.to_string(),
            delivery_count,
        };
        if sender.send(Delivery::new(metadata, body, acker)).is_err() {
            self.unacked.lock().remove(&delivery_tag);
            return false;
        }
        true
    }

    fn take_unacked(&self, delivery_tag: u64) -> Option<Unacked> {
        self.unacked.lock().remove(&delivery_tag)
    }

    fn push_dead_letter(&self, message: Unacked, reason: &str) {
        self.dead_letters.push(DeadLetter {
            queue: self.name.clone(),
            routing_key: message.routing_key,
            body: message.body,
            reason: reason.to_string(),
            delivery_count: message.delivery_count,
        });
    }
}

#[async_trait]
impl Acknowledger for QueueState {
    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.take_unacked(delivery_tag);
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        let Some(message) = self.take_unacked(delivery_tag) else {
            return Ok(());
        };
        if !requeue {
            self.push_dead_letter(message, "rejected");
            return Ok(());
        }

        let routing_key = message.routing_key.clone();
        if !self.deliver(&routing_key, message.body, message.delivery_count + 1) {
            tracing::debug!(queue = %self.name, routing_key = %routing_key, "requeue dropped, queue closed");
        }
        Ok(())
    }

    async fn dead_letter(&self, delivery_tag: u64, reason: &str) -> Result<()> {
        if let Some(message) = self.take_unacked(delivery_tag) {
            self.push_dead_letter(message, reason);
        }
        Ok(())
    }
}

struct Inner {
    exchange: String,
    queues: Mutex<Vec<Arc<QueueState>>>,
    published: History<PublishedMessage>,
    dead_letters: Arc<History<DeadLetter>>,
    publish_delay: Mutex<Option<Duration>>,
    fail_on_publish: AtomicBool,
    unavailable: AtomicBool,
    next_queue: AtomicU64,
}

/// Topic exchange held in process memory.
///
/// Each subscription gets its own exclusive, auto-delete queue. Messages stay
/// outstanding until acked; a requeued message comes back with
/// `redelivered = true` and an incremented delivery count.
///
/// Published messages and dead letters are recorded for inspection, up to
/// the configured history limit.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::with_config(InMemoryBrokerConfig::default())
    }
}

impl InMemoryBroker {
    /// Creates a new, empty exchange that keeps its full history.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: InMemoryBrokerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                exchange: config.exchange,
                queues: Mutex::new(Vec::new()),
                published: History::new(config.history_limit),
                dead_letters: Arc::new(History::new(config.history_limit)),
                publish_delay: Mutex::new(None),
                fail_on_publish: AtomicBool::new(false),
                unavailable: AtomicBool::new(false),
                next_queue: AtomicU64::new(0),
            }),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.inner.exchange
    }

    /// Configures publishes to fail with [`BrokerError::Unavailable`].
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.inner.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Delays every publish, for exercising publish timeouts.
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        *self.inner.publish_delay.lock() = delay;
    }

    /// Marks the exchange as unreachable for publish and subscribe.
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Tears down every open queue as a dropped connection would.
    pub fn sever_connections(&self) {
        let queues: Vec<_> = self.inner.queues.lock().drain(..).collect();
        for queue in queues {
            queue.sever();
        }
    }

    /// Returns the recorded messages accepted so far, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.published.snapshot()
    }

    /// Returns the messages accepted under `routing_key`.
    pub fn published_to(&self, routing_key: &str) -> Vec<PublishedMessage> {
        self.inner
            .published
            .filtered(|m| m.routing_key == routing_key)
    }

    /// Returns the decoded events accepted under `routing_key`.
    pub fn published_events(&self, routing_key: &str) -> Vec<FulfillmentEvent> {
        self.published_to(routing_key)
            .iter()
            .filter_map(|m| decode(&m.body).ok())
            .collect()
    }

    /// Waits until at least `count` messages were published under
    /// `routing_key`. Returns false on timeout.
    pub async fn wait_for_published(
        &self,
        routing_key: &str,
        count: usize,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.published_to(routing_key).len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.snapshot()
    }

    /// Returns the number of open queues.
    pub fn queue_count(&self) -> usize {
        self.inner
            .queues
            .lock()
            .iter()
            .filter(|q| !q.is_closed())
            .count()
    }

    /// Returns the number of delivered but unsettled messages.
    pub fn outstanding(&self) -> usize {
        self.inner
            .queues
            .lock()
            .iter()
            .map(|q| q.unacked.lock().len())
            .sum()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> Result<()> {
        let delay = *self.inner.publish_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.ensure_available()?;
        if self.inner.fail_on_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("publish rejected".to_string()));
        }

        self.inner.published.push(PublishedMessage {
            routing_key: routing_key.to_string(),
            body: body.clone(),
        });

        let mut queues = self.inner.queues.lock();
        queues.retain(|q| !q.is_closed());
        let mut routed = 0;
        for queue in queues.iter().filter(|q| q.is_bound_to(routing_key)) {
            if queue.deliver(routing_key, body.clone(), 1) {
                routed += 1;
            }
        }
        tracing::trace!(exchange = %self.inner.exchange, routing_key, routed, "published");
        Ok(())
    }

    async fn subscribe(&self, consumer: &str, binding_keys: &[String]) -> Result<Subscription> {
        self.ensure_available()?;

        let id = self.inner.next_queue.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!("{}.{consumer}.{id}", self.inner.exchange);
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Arc::new_cyclic(|me| QueueState {
            name: name.clone(),
            bindings: binding_keys.to_vec(),
            sender: Mutex::new(Some(sender)),
            unacked: Mutex::new(HashMap::new()),
            next_tag: AtomicU64::new(0),
            dead_letters: Arc::clone(&self.inner.dead_letters),
            me: me.clone(),
        });
        self.inner.queues.lock().push(queue);

        tracing::debug!(
            exchange = %self.inner.exchange,
            queue = %name,
            bindings = ?binding_keys,
            "queue bound"
        );
        Ok(Subscription::new(name, receiver))
    }

    async fn close(&self) -> Result<()> {
        self.sever_connections();
        Ok(())
    }
}

/// Connector handing out an [`InMemoryBroker`], optionally failing first.
pub struct InMemoryConnector {
    broker: InMemoryBroker,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
}

impl InMemoryConnector {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self::failing(broker, 0)
    }

    /// Refuses the first `failures` connection attempts.
    pub fn failing(broker: InMemoryBroker, failures: u32) -> Self {
        Self {
            broker,
            failures_remaining: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    /// Returns the number of connection attempts made.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerConnector for InMemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn Broker>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }
        Ok(Arc::new(self.broker.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::topics;

    fn bindings(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn publish_fans_out_to_matching_queues() {
        let broker = InMemoryBroker::new();
        let mut inventory = broker
            .subscribe("inventory", &bindings(&[topics::ORDER_CREATED]))
            .await
            .unwrap();
        let mut audit = broker.subscribe("audit", &bindings(&["#"])).await.unwrap();
        let mut payment = broker
            .subscribe("payment", &bindings(&[topics::INVENTORY_LOCKED]))
            .await
            .unwrap();

        broker
            .publish(topics::ORDER_CREATED, b"{}".to_vec())
            .await
            .unwrap();

        assert_eq!(inventory.next().await.unwrap().metadata.delivery_count, 1);
        assert_eq!(
            audit.next().await.unwrap().metadata.routing_key,
            topics::ORDER_CREATED
        );
        let idle = tokio::time::timeout(Duration::from_millis(20), payment.next()).await;
        assert!(idle.is_err());
        assert_eq!(broker.outstanding(), 2);
    }

    #[tokio::test]
    async fn ack_settles_the_message() {
        let broker = InMemoryBroker::new();
        let mut sub = broker
            .subscribe("inventory", &bindings(&["order.*"]))
            .await
            .unwrap();
        broker
            .publish(topics::ORDER_CREATED, b"{}".to_vec())
            .await
            .unwrap();

        sub.next().await.unwrap().ack().await.unwrap();

        assert_eq!(broker.outstanding(), 0);
        assert!(broker.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn requeued_messages_are_redelivered() {
        let broker = InMemoryBroker::new();
        let mut sub = broker
            .subscribe("inventory", &bindings(&[topics::ORDER_CREATED]))
            .await
            .unwrap();
        broker
            .publish(topics::ORDER_CREATED, b"{}".to_vec())
            .await
            .unwrap();

        let first = sub.next().await.unwrap();
        assert!(!first.metadata.redelivered);
        first.nack(true).await.unwrap();

        let second = sub.next().await.unwrap();
        assert!(second.metadata.redelivered);
        assert_eq!(second.metadata.delivery_count, 2);
        assert_eq!(broker.outstanding(), 1);
    }

    #[tokio::test]
    async fn rejected_messages_are_dead_lettered() {
        let broker = InMemoryBroker::new();
        let mut sub = broker
            .subscribe("payment", &bindings(&[topics::INVENTORY_LOCKED]))
            .await
            .unwrap();
        broker
            .publish(topics::INVENTORY_LOCKED, b"garbage".to_vec())
            .await
            .unwrap();
        broker
            .publish(topics::INVENTORY_LOCKED, b"more".to_vec())
            .await
            .unwrap();

        sub.next().await.unwrap().dead_letter("malformed").await.unwrap();
        sub.next().await.unwrap().nack(false).await.unwrap();

        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 2);
        assert_eq!(dead[0].reason, "malformed");
        assert_eq!(dead[0].body, b"garbage");
        assert_eq!(dead[1].reason, "rejected");
        assert!(dead[0].queue.starts_with("orders.payment."));
    }

    #[tokio::test]
    async fn severed_subscriptions_end_and_queues_are_removed() {
        let broker = InMemoryBroker::new();
        let mut sub = broker
            .subscribe("order", &bindings(&[topics::PAYMENT_COMPLETED]))
            .await
            .unwrap();
        assert_eq!(broker.queue_count(), 1);

        broker.sever_connections();

        assert!(sub.next().await.is_none());
        assert_eq!(broker.queue_count(), 0);
    }

    #[tokio::test]
    async fn dropped_subscription_stops_receiving() {
        let broker = InMemoryBroker::new();
        let sub = broker
            .subscribe("order", &bindings(&[topics::PAYMENT_COMPLETED]))
            .await
            .unwrap();
        drop(sub);

        broker
            .publish(topics::PAYMENT_COMPLETED, b"{}".to_vec())
            .await
            .unwrap();

        assert_eq!(broker.queue_count(), 0);
        assert_eq!(broker.outstanding(), 0);
    }

    #[tokio::test]
    async fn unavailable_broker_rejects_operations() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);

        assert!(
            broker
                .publish(topics::ORDER_CREATED, Vec::new())
                .await
                .unwrap_err()
                .is_transient()
        );
        assert!(broker.subscribe("x", &[]).await.is_err());
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn history_limit_keeps_only_the_latest_messages() {
        let broker = InMemoryBroker::with_config(InMemoryBrokerConfig {
            history_limit: Some(2),
            ..InMemoryBrokerConfig::default()
        });
        let mut sub = broker
            .subscribe("inventory", &bindings(&[topics::ORDER_CREATED]))
            .await
            .unwrap();

        for body in [b"1", b"2", b"3"] {
            broker
                .publish(topics::ORDER_CREATED, body.to_vec())
                .await
                .unwrap();
        }
        for _ in 0..3 {
            sub.next().await.unwrap().dead_letter("rejected").await.unwrap();
        }

        let bodies: Vec<_> = broker.published().into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec![b"2".to_vec(), b"3".to_vec()]);
        assert_eq!(broker.dead_letters().len(), 2);
        assert_eq!(broker.dead_letters()[0].body, b"2");
    }

    #[tokio::test]
    async fn zero_history_still_routes_messages() {
        let broker = InMemoryBroker::with_config(InMemoryBrokerConfig {
            exchange: "fulfillment".to_string(),
            history_limit: Some(0),
        });
        let mut sub = broker
            .subscribe("payment", &bindings(&[topics::INVENTORY_LOCKED]))
            .await
            .unwrap();

        broker
            .publish(topics::INVENTORY_LOCKED, b"{}".to_vec())
            .await
            .unwrap();

        assert_eq!(broker.exchange(), "fulfillment");
        assert!(sub.queue().starts_with("fulfillment.payment."));
        assert_eq!(sub.next().await.unwrap().body, b"{}");
        assert!(broker.published().is_empty());
    }
}
