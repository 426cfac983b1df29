//! Fulfillment error types.

use broker::BrokerError;
use common::{Classify, ErrorClass, OrderId};
use domain::{Order, OrderStatus, StoreError, ValidationError};
use thiserror::Error;

/// Errors raised by the choreography components.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An event payload that passed decoding but makes no sense.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Invalid transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// The order is not visible yet. Events for it are requeued.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The order was persisted but `order.created` was not published.
    #[error("Order {} persisted but not published: {source}", .order.id)]
    Publish {
        order: Box<Order>,
        #[source]
        source: BrokerError,
    },

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl Classify for FulfillmentError {
    fn class(&self) -> ErrorClass {
        match self {
            FulfillmentError::Validation(_) | FulfillmentError::MalformedEvent(_) => {
                ErrorClass::Validation
            }
            FulfillmentError::InvalidTransition { .. } => ErrorClass::Conflict,
            FulfillmentError::OrderNotFound(_) => ErrorClass::Transient,
            FulfillmentError::Store(e) => e.class(),
            FulfillmentError::Publish { source, .. } => source.class(),
            FulfillmentError::Broker(e) => e.class(),
        }
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
