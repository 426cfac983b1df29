//! Inventory reservation: turns `order.created` into an all-or-nothing stock
//! reservation and announces the outcome.

use std::sync::Arc;

use async_trait::async_trait;
use broker::{
    EventEnvelope, EventPublisher, FulfillmentEvent, InventoryLocked, InventoryReservationFailed,
    MessageHandler, OrderCreated, topics,
};
use common::{ProductId, RetryStrategy, Telemetry};
use domain::{
    InventoryRecord, InventoryStore, Order, OrderItem, ReservationLine, ReservationOutcome,
};

use crate::error::{FulfillmentError, Result};
use crate::retry::{default_store_retry, with_store_retry};

/// Owns stock counters and the per-order reservation ledger.
pub struct InventoryReservation {
    inventory: Arc<dyn InventoryStore>,
    publisher: EventPublisher,
    store_retry: RetryStrategy,
    telemetry: Telemetry,
}

impl InventoryReservation {
    pub fn new(
        inventory: Arc<dyn InventoryStore>,
        publisher: EventPublisher,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            inventory,
            publisher,
            store_retry: default_store_retry(),
            telemetry,
        }
    }

    /// Overrides the retry applied to transient store failures.
    pub fn with_store_retry(mut self, strategy: RetryStrategy) -> Self {
        self.store_retry = strategy;
        self
    }

    /// Reserves every item of the order or none of them, then publishes
    /// `inventory.locked` or `inventory.reservation_failed`.
    ///
    /// A redelivered order replays the recorded outcome without touching
    /// stock, and the outcome event is published again.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn reserve(&self, event: &OrderCreated) -> Result<ReservationOutcome> {
        let lines = validate(event)?;

        let reservation = with_store_retry(&self.store_retry, "inventory_reserve", || {
            self.inventory.reserve_order(event.order_id, &lines)
        })
        .await?;

        if reservation.replayed {
            self.telemetry.incr("reservations_replayed_total");
            tracing::debug!(outcome = %reservation.outcome, "reservation already recorded");
        } else {
            self.telemetry
                .incr_with("reservations_total", "outcome", reservation.outcome.as_str());
        }

        let outcome_event = match reservation.outcome {
            ReservationOutcome::Reserved => {
                tracing::info!(items = lines.len(), "inventory reserved");
                FulfillmentEvent::InventoryLocked(InventoryLocked {
                    order_id: event.order_id,
                    user_id: event.user_id,
                    total_price: event.total_price,
                })
            }
            ReservationOutcome::Failed(reason) => {
                tracing::info!(reason = %reason, "inventory reservation failed");
                FulfillmentEvent::InventoryReservationFailed(InventoryReservationFailed {
                    order_id: event.order_id,
                    user_id: event.user_id,
                    reason,
                })
            }
        };
        self.publisher.publish(&outcome_event).await?;
        Ok(reservation.outcome)
    }

    pub async fn product(&self, product_id: ProductId) -> Result<Option<InventoryRecord>> {
        Ok(
            with_store_retry(&self.store_retry, "inventory_get", || {
                self.inventory.get(product_id)
            })
            .await?,
        )
    }

    /// Lists the catalogue ordered by product id.
    pub async fn products(&self, offset: i64, limit: i64) -> Result<Vec<InventoryRecord>> {
        Ok(
            with_store_retry(&self.store_retry, "inventory_list", || {
                self.inventory.list(offset, limit)
            })
            .await?,
        )
    }
}

/// Checks the announced items and total, returning the lines to reserve.
fn validate(event: &OrderCreated) -> Result<Vec<ReservationLine>> {
    let items: Vec<OrderItem> = event
        .items
        .iter()
        .map(|item| OrderItem {
            product_id: item.product_id,
            quantity: item.quantity,
            price: item.price,
        })
        .collect();

    let total = Order::compute_total(&items)?;
    if total != event.total_price {
        return Err(FulfillmentError::MalformedEvent(format!(
            "total_price {} does not match items total {}",
            event.total_price, total
        )));
    }

    Ok(items
        .iter()
        .map(|item| ReservationLine {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect())
}

#[async_trait]
impl MessageHandler for InventoryReservation {
    type Error = FulfillmentError;

    fn name(&self) -> &'static str {
        "inventory-reservation"
    }

    fn binding_keys(&self) -> Vec<String> {
        vec![topics::ORDER_CREATED.to_string()]
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        match &envelope.event {
            FulfillmentEvent::OrderCreated(event) => self.reserve(event).await.map(|_| ()),
            other => {
                tracing::debug!(event_type = other.event_type(), "ignoring event");
                Ok(())
            }
        }
    }
}
