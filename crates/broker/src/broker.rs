//! Broker abstraction: topic-bound publish, queue-bound subscribe, manual acks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{RetryError, RetryStrategy, retry};
use tokio::sync::mpsc;

use crate::error::{BrokerError, CodecError, Result};
use crate::event::{DeliveryMetadata, EventEnvelope, FulfillmentEvent, decode, encode};

/// Settles deliveries on behalf of a subscription.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Removes the message from the queue.
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Rejects the message. With `requeue` it is delivered again, otherwise it
    /// is dead-lettered.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;

    /// Rejects the message without requeue, recording why.
    async fn dead_letter(&self, delivery_tag: u64, reason: &str) -> Result<()>;
}

/// A message handed to a consumer. It stays outstanding until settled.
pub struct Delivery {
    pub metadata: DeliveryMetadata,
    pub body: Vec<u8>,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(metadata: DeliveryMetadata, body: Vec<u8>, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            metadata,
            body,
            acker,
        }
    }

    /// Decodes the body into an [`EventEnvelope`].
    pub fn decode(&self) -> std::result::Result<EventEnvelope, CodecError> {
        Ok(EventEnvelope {
            event: decode(&self.body)?,
            metadata: self.metadata.clone(),
        })
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack(self.metadata.delivery_tag).await
    }

    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.acker.nack(self.metadata.delivery_tag, requeue).await
    }

    pub async fn dead_letter(self, reason: &str) -> Result<()> {
        self.acker
            .dead_letter(self.metadata.delivery_tag, reason)
            .await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("metadata", &self.metadata)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Stream of deliveries from one queue. Ends when the queue is torn down.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub fn new(queue: impl Into<String>, receiver: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            queue: queue.into(),
            receiver,
        }
    }

    /// Returns the name of the bound queue.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Waits for the next delivery. Returns `None` once the queue is gone.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}

/// A connection to a topic exchange.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes a message to the exchange under `routing_key`.
    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> Result<()>;

    /// Declares an exclusive, auto-delete queue for `consumer`, binds it to
    /// every pattern in `binding_keys` and starts consuming from it.
    async fn subscribe(&self, consumer: &str, binding_keys: &[String]) -> Result<Subscription>;

    /// Closes the connection. Open subscriptions end.
    async fn close(&self) -> Result<()>;
}

/// Opens broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Broker>>;
}

/// Connects with bounded retry. Running out of attempts is fatal.
pub async fn connect_with_retry(
    connector: &dyn BrokerConnector,
    strategy: &RetryStrategy,
) -> Result<Arc<dyn Broker>> {
    let broker = retry(strategy, "broker_connect", BrokerError::is_transient, || {
        connector.connect()
    })
    .await
    .map_err(|e| match e {
        RetryError::Exhausted {
            attempts,
            last_error,
        } => BrokerError::ConnectExhausted {
            attempts,
            last_error: last_error.to_string(),
        },
        RetryError::Aborted(error) => error,
    })?;

    tracing::info!("connected to broker");
    Ok(broker)
}

/// Encodes events and publishes them under their routing key with a timeout.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    timeout: Duration,
}

impl EventPublisher {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a new publisher with the default timeout.
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[tracing::instrument(
        skip(self, event),
        fields(event_type = event.event_type(), order_id = %event.order_id())
    )]
    pub async fn publish(&self, event: &FulfillmentEvent) -> Result<()> {
        let routing_key = event.routing_key();
        let body = encode(event)?;

        match tokio::time::timeout(self.timeout, self.broker.publish(routing_key, body)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::PublishTimeout {
                routing_key: routing_key.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
