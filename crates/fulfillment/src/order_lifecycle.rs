//! Order lifecycle: creation, cache-first reads and status transitions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker::{
    EventEnvelope, EventPublisher, FulfillmentEvent, InventoryLocked, InventoryReservationFailed,
    LineItem, MessageHandler, OrderCreated, PaymentCompleted, topics,
};
use chrono::Utc;
use common::{OrderId, RetryStrategy, Telemetry, UserId};
use domain::{Order, OrderCache, OrderItem, OrderStatus, OrderStore, TransitionOutcome};

use crate::error::{FulfillmentError, Result};
use crate::retry::{default_store_retry, with_store_retry};

/// Order lifecycle settings.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Expiry of cache entries written after each store mutation.
    pub cache_ttl: Duration,
    pub store_retry: RetryStrategy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            store_retry: default_store_retry(),
        }
    }
}

/// Owns order status.
///
/// The store is authoritative; every successful store mutation is mirrored
/// into the cache. A cache failure never fails the operation.
pub struct OrderLifecycle {
    orders: Arc<dyn OrderStore>,
    cache: Arc<dyn OrderCache>,
    publisher: EventPublisher,
    config: LifecycleConfig,
    telemetry: Telemetry,
}

impl OrderLifecycle {
    /// Creates a new order lifecycle component.
    pub fn new(
        orders: Arc<dyn OrderStore>,
        cache: Arc<dyn OrderCache>,
        publisher: EventPublisher,
        config: LifecycleConfig,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            orders,
            cache,
            publisher,
            config,
            telemetry,
        }
    }

    /// Validates, persists and announces a new `pending` order.
    ///
    /// A publish failure after the order is stored returns
    /// [`FulfillmentError::Publish`] carrying the stored order; the reaper
    /// republishes it later.
    #[tracing::instrument(skip(self, items))]
    pub async fn create_order(&self, user_id: UserId, items: Vec<OrderItem>) -> Result<Order> {
        let order = match Order::new(user_id, items) {
            Ok(order) => order,
            Err(error) => {
                self.telemetry.incr("orders_rejected_total");
                return Err(error.into());
            }
        };

        with_store_retry(&self.config.store_retry, "order_create", || {
            self.orders.create(&order)
        })
        .await?;
        self.telemetry.incr("orders_created_total");
        self.refresh_cache(&order).await;

        if let Err(source) = self.publisher.publish(&order_created(&order)).await {
            tracing::warn!(
                order_id = %order.id,
                error = %source,
                "order persisted but order.created was not published"
            );
            self.telemetry.incr("order_publish_failures_total");
            return Err(FulfillmentError::Publish {
                order: Box::new(order),
                source,
            });
        }

        tracing::info!(
            order_id = %order.id,
            total_price = order.total_price.cents(),
            items = order.items.len(),
            "order created"
        );
        Ok(order)
    }

    /// Reads an order, preferring the cache. A store hit repopulates the cache.
    pub async fn get_order(&self, id: OrderId) -> Result<Order> {
        match self.cache.get(id).await {
            Ok(Some(order)) => {
                self.telemetry
                    .incr_with("order_cache_lookups_total", "result", "hit");
                return Ok(order);
            }
            Ok(None) => {
                self.telemetry
                    .incr_with("order_cache_lookups_total", "result", "miss");
            }
            Err(error) => {
                tracing::warn!(order_id = %id, error = %error, "cache read failed, falling back to store");
                self.telemetry.incr("order_cache_errors_total");
            }
        }

        let order = with_store_retry(&self.config.store_retry, "order_get", || {
            self.orders.get(id)
        })
        .await?
        .ok_or(FulfillmentError::OrderNotFound(id))?;
        self.refresh_cache(&order).await;
        Ok(order)
    }

    /// `payment.completed`: moves the order to `completed`.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn handle_settlement(&self, event: &PaymentCompleted) -> Result<()> {
        self.react(event.order_id, OrderStatus::Completed).await
    }

    /// `inventory.reservation_failed`: cancels the order.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id, reason = %event.reason))]
    pub async fn handle_reservation_failure(&self, event: &InventoryReservationFailed) -> Result<()> {
        self.react(event.order_id, OrderStatus::Cancelled).await
    }

    /// `inventory.locked`: moves a `pending` order to `processing`.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn handle_reservation_success(&self, event: &InventoryLocked) -> Result<()> {
        self.react(event.order_id, OrderStatus::Processing).await
    }

    /// Operator-initiated transition. Rejected if the state machine forbids it.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Order> {
        match self.transition(id, status).await? {
            TransitionOutcome::Applied(order) => Ok(order),
            TransitionOutcome::Unchanged(order) => Err(FulfillmentError::InvalidTransition {
                order_id: id,
                from: order.status,
                to: status,
            }),
            TransitionOutcome::NotFound => Err(FulfillmentError::OrderNotFound(id)),
        }
    }

    /// Publishes `order.created` again for every order left `pending` or
    /// `processing` for longer than `threshold`. Returns the number of orders
    /// republished.
    ///
    /// A `processing` order whose `inventory.locked` never reached payment
    /// capture is driven again: the reservation ledger replays the lock and
    /// capture creates at most one payment per order.
    pub async fn republish_stale(&self, threshold: Duration) -> Result<usize> {
        let Some(cutoff) = chrono::Duration::from_std(threshold)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };

        let stale = with_store_retry(&self.config.store_retry, "order_list_stale", || {
            self.orders.list_stale_unfinished(cutoff)
        })
        .await?;

        for order in &stale {
            self.publisher.publish(&order_created(order)).await?;
            self.telemetry.incr("orders_republished_total");
            tracing::info!(order_id = %order.id, status = %order.status, "republished stale order");
        }
        Ok(stale.len())
    }

    async fn react(&self, id: OrderId, status: OrderStatus) -> Result<()> {
        match self.transition(id, status).await? {
            TransitionOutcome::Applied(_) => Ok(()),
            TransitionOutcome::Unchanged(order) => {
                if order.status == OrderStatus::Cancelled && status == OrderStatus::Completed {
                    tracing::warn!(order_id = %id, "payment completed for a cancelled order");
                }
                tracing::debug!(
                    order_id = %id,
                    current = %order.status,
                    requested = %status,
                    "transition not applicable, discarding event"
                );
                self.telemetry.incr("order_events_discarded_total");
                Ok(())
            }
            TransitionOutcome::NotFound => Err(FulfillmentError::OrderNotFound(id)),
        }
    }

    async fn transition(&self, id: OrderId, status: OrderStatus) -> Result<TransitionOutcome> {
        let outcome = with_store_retry(&self.config.store_retry, "order_transition", || {
            self.orders.transition(id, status, Utc::now())
        })
        .await?;

        if let TransitionOutcome::Applied(order) = &outcome {
            self.telemetry
                .incr_with("order_transitions_total", "status", status.as_str());
            tracing::info!(order_id = %id, status = %status, "order status changed");
            self.refresh_cache(order).await;
        }
        Ok(outcome)
    }

    async fn refresh_cache(&self, order: &Order) {
        if let Err(error) = self.cache.set(order, self.config.cache_ttl).await {
            tracing::warn!(order_id = %order.id, error = %error, "cache write failed");
            self.telemetry.incr("order_cache_write_failures_total");
        }
    }
}

/// Builds the `order.created` announcement for a stored order.
pub fn order_created(order: &Order) -> FulfillmentEvent {
    FulfillmentEvent::OrderCreated(OrderCreated {
        order_id: order.id,
        user_id: order.user_id,
        items: order
            .items
            .iter()
            .map(|item| LineItem {
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
            })
            .collect(),
        total_price: order.total_price,
        created_at: order.created_at,
    })
}

#[async_trait]
impl MessageHandler for OrderLifecycle {
    type Error = FulfillmentError;

    fn name(&self) -> &'static str {
        "order-lifecycle"
    }

    fn binding_keys(&self) -> Vec<String> {
        vec![
            topics::INVENTORY_LOCKED.to_string(),
            topics::INVENTORY_RESERVATION_FAILED.to_string(),
            topics::PAYMENT_COMPLETED.to_string(),
        ]
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        match &envelope.event {
            FulfillmentEvent::PaymentCompleted(event) => self.handle_settlement(event).await,
            FulfillmentEvent::InventoryReservationFailed(event) => {
                self.handle_reservation_failure(event).await
            }
            FulfillmentEvent::InventoryLocked(event) => {
                self.handle_reservation_success(event).await
            }
            FulfillmentEvent::OrderCreated(_) => {
                tracing::debug!(order_id = %envelope.order_id(), "ignoring event not meant for the order lifecycle");
                Ok(())
            }
        }
    }
}
