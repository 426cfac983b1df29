//! Event payloads and the JSON envelope codec.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, ProductId, ReservationFailureReason, UserId};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::topic::topics;

/// One line of an order as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: i64,
    pub price: Money,
}

/// Published once an order has been persisted as `pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub user_id: UserId,
    #[serde(alias = "products")]
    pub items: Vec<LineItem>,
    pub total_price: Money,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Published when every line item of an order has been reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLocked {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total_price: Money,
}

/// Published when at least one line item could not be reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReservationFailed {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub reason: ReservationFailureReason,
}

/// Published once a payment has been recorded for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total_price: Money,
}

/// Every event exchanged by the choreography, tagged by `event_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum FulfillmentEvent {
    OrderCreated(OrderCreated),
    InventoryLocked(InventoryLocked),
    InventoryReservationFailed(InventoryReservationFailed),
    PaymentCompleted(PaymentCompleted),
}

impl FulfillmentEvent {
    /// Returns the `event_type` tag written to the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            FulfillmentEvent::OrderCreated(_) => "order_created",
            FulfillmentEvent::InventoryLocked(_) => "inventory_locked",
            FulfillmentEvent::InventoryReservationFailed(_) => "inventory_reservation_failed",
            FulfillmentEvent::PaymentCompleted(_) => "payment_completed",
        }
    }

    /// Returns the routing key this event is published under.
    pub fn routing_key(&self) -> &'static str {
        match self {
            FulfillmentEvent::OrderCreated(_) => topics::ORDER_CREATED,
            FulfillmentEvent::InventoryLocked(_) => topics::INVENTORY_LOCKED,
            FulfillmentEvent::InventoryReservationFailed(_) => {
                topics::INVENTORY_RESERVATION_FAILED
            }
            FulfillmentEvent::PaymentCompleted(_) => topics::PAYMENT_COMPLETED,
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            FulfillmentEvent::OrderCreated(e) => e.order_id,
            FulfillmentEvent::InventoryLocked(e) => e.order_id,
            FulfillmentEvent::InventoryReservationFailed(e) => e.order_id,
            FulfillmentEvent::PaymentCompleted(e) => e.order_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            FulfillmentEvent::OrderCreated(e) => e.user_id,
            FulfillmentEvent::InventoryLocked(e) => e.user_id,
            FulfillmentEvent::InventoryReservationFailed(e) => e.user_id,
            FulfillmentEvent::PaymentCompleted(e) => e.user_id,
        }
    }
}

impl From<OrderCreated> for FulfillmentEvent {
    fn from(event: OrderCreated) -> Self {
        FulfillmentEvent::OrderCreated(event)
    }
}

impl From<InventoryLocked> for FulfillmentEvent {
    fn from(event: InventoryLocked) -> Self {
        FulfillmentEvent::InventoryLocked(event)
    }
}

impl From<InventoryReservationFailed> for FulfillmentEvent {
    fn from(event: InventoryReservationFailed) -> Self {
        FulfillmentEvent::InventoryReservationFailed(event)
    }
}

impl From<PaymentCompleted> for FulfillmentEvent {
    fn from(event: PaymentCompleted) -> Self {
        FulfillmentEvent::PaymentCompleted(event)
    }
}

/// Serializes an event into its JSON envelope.
pub fn encode(event: &FulfillmentEvent) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(event)?)
}

/// Parses a JSON envelope. Unknown fields are ignored.
pub fn decode(body: &[u8]) -> Result<FulfillmentEvent, CodecError> {
    Ok(serde_json::from_slice(body)?)
}

/// Per-delivery information supplied by the broker adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryMetadata {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub routing_key: String,
    /// Number of times this message has been handed to a consumer, starting at 1.
    pub delivery_count: u32,
}

/// A decoded event together with its delivery metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    pub event: FulfillmentEvent,
    pub metadata: DeliveryMetadata,
}

impl EventEnvelope {
    pub fn order_id(&self) -> OrderId {
        self.event.order_id()
    }

    pub fn user_id(&self) -> UserId {
        self.event.user_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_created() -> OrderCreated {
        OrderCreated {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            items: vec![LineItem {
                product_id: ProductId::new(1001),
                quantity: 2,
                price: Money::from_cents(100),
            }],
            total_price: Money::from_cents(200),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn envelope_carries_event_type_tag() {
        let event = FulfillmentEvent::from(order_created());
        let json: serde_json::Value = serde_json::from_slice(&encode(&event).unwrap()).unwrap();

        assert_eq!(json["event_type"], "order_created");
        assert_eq!(json["items"][0]["product_id"], 1001);
        assert_eq!(json["total_price"], 200);
        assert_eq!(event.routing_key(), topics::ORDER_CREATED);
    }

    #[test]
    fn decode_accepts_legacy_products_key_and_extra_fields() {
        let order_id = OrderId::new();
        let user_id = UserId::new();
        let body = format!(
            r#"{{"event_type":"order_created","order_id":"{order_id}","user_id":"{user_id}",
                "products":[{{"product_id":1002,"quantity":1,"price":899999}}],
                "total_price":899999,"status":"pending","trace":"abc"}}"#
        );

        let event = decode(body.as_bytes()).unwrap();
        let FulfillmentEvent::OrderCreated(created) = event else {
            panic!("expected order_created");
        };
        assert_eq!(created.order_id, order_id);
        assert_eq!(created.items.len(), 1);
        assert_eq!(created.items[0].product_id, ProductId::new(1002));
    }

    #[test]
    fn reservation_failure_reason_is_snake_case() {
        let event = FulfillmentEvent::from(InventoryReservationFailed {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            reason: ReservationFailureReason::InsufficientStock,
        });
        let json: serde_json::Value = serde_json::from_slice(&encode(&event).unwrap()).unwrap();
        assert_eq!(json["event_type"], "inventory_reservation_failed");
        assert_eq!(json["reason"], "insufficient_stock");
    }

    #[test]
    fn decode_rejects_malformed_payloads() {
        assert!(decode(b"not json").is_err());
        assert!(decode(br#"{"event_type":"order_shipped","order_id":"x"}"#).is_err());

        let missing_total = format!(
            r#"{{"event_type":"inventory_locked","order_id":"{}","user_id":"{}"}}"#,
            OrderId::new(),
            UserId::new()
        );
        assert!(decode(missing_total.as_bytes()).is_err());
    }

    #[test]
    fn correlation_ids_are_exposed() {
        let created = order_created();
        let event = FulfillmentEvent::from(created.clone());
        assert_eq!(event.order_id(), created.order_id);
        assert_eq!(event.user_id(), created.user_id);
        assert_eq!(event.event_type(), "order_created");
    }
}
