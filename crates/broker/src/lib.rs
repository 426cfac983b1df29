//! Publish/subscribe plumbing for the fulfillment choreography.
//!
//! This crate provides:
//! - The JSON event envelope shared by every participant
//! - A [`Broker`] trait with topic-bound publish and queue-bound subscribe
//! - An in-memory topic exchange with at-least-once, manually acknowledged delivery
//! - A cancellable [`Consumer`] loop that turns handler errors into ack decisions

pub mod broker;
pub mod consumer;
pub mod error;
pub mod event;
pub mod memory;
pub mod topic;

pub use broker::{
    Acknowledger, Broker, BrokerConnector, Delivery, EventPublisher, Subscription,
    connect_with_retry,
};
pub use consumer::{Consumer, ConsumerConfig, ConsumerError, ConsumerReport, MessageHandler};
pub use error::{BrokerError, CodecError, Result};
pub use event::{
    DeliveryMetadata, EventEnvelope, FulfillmentEvent, InventoryLocked,
    InventoryReservationFailed, LineItem, OrderCreated, PaymentCompleted, decode, encode,
};
pub use memory::{
    DeadLetter, InMemoryBroker, InMemoryBrokerConfig, InMemoryConnector, PublishedMessage,
};
pub use topic::{topic_matches, topics};
