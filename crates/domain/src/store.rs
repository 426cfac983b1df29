//! Store capability traits.
//!
//! Each component depends only on the capability it needs. The in-memory and
//! Postgres implementations live in the `storage` crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use common::{OrderId, ProductId, ReservationFailureReason, RetryStrategy, UserId, retry};

use crate::error::StoreError;
use crate::inventory::{
    DecrementOutcome, InventoryRecord, Reservation, ReservationLine, ReservationOutcome,
};
use crate::order::{Order, OrderStatus};
use crate::payment::{PaymentInsert, PaymentRecord};

/// Result of a conditional status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The status changed; the updated order is returned.
    Applied(Order),
    /// The current status does not allow the transition; nothing changed.
    Unchanged(Order),
    NotFound,
}

/// Persistence for orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create(&self, order: &Order) -> Result<(), StoreError>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Sets the status to `to` only while the current status is one of
    /// `to.predecessors()`. Terminal orders are never modified.
    async fn transition(
        &self,
        id: OrderId,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Orders still `pending` or `processing` whose last update is before
    /// `older_than`, oldest first.
    async fn list_stale_unfinished(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError>;
}

/// Persistence for stock counters and the per-order reservation ledger.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn get(&self, product_id: ProductId) -> Result<Option<InventoryRecord>, StoreError>;

    /// Records ordered by product id.
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<InventoryRecord>, StoreError>;

    async fn upsert(&self, record: &InventoryRecord) -> Result<(), StoreError>;

    /// Atomically subtracts `quantity` if at least that much is on hand.
    async fn try_decrement(
        &self,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<DecrementOutcome, StoreError>;

    /// Adds `quantity` back, reversing an earlier decrement.
    async fn increment(&self, product_id: ProductId, quantity: i64) -> Result<(), StoreError>;

    async fn reservation(&self, order_id: OrderId)
    -> Result<Option<ReservationOutcome>, StoreError>;

    /// Inserts the ledger entry. Returns false if the order already had one.
    async fn record_reservation(
        &self,
        order_id: OrderId,
        outcome: ReservationOutcome,
    ) -> Result<bool, StoreError>;

    /// Reserves every line of an order, or none of them.
    ///
    /// A ledger hit returns the recorded outcome without touching stock. On
    /// failure every decrement already applied for this order is reversed,
    /// including when the ledger write itself errors, so a retried call
    /// starts from the original stock.
    async fn reserve_order(
        &self,
        order_id: OrderId,
        lines: &[ReservationLine],
    ) -> Result<Reservation, StoreError> {
        if let Some(outcome) = self.reservation(order_id).await? {
            return Ok(Reservation {
                outcome,
                replayed: true,
            });
        }

        let mut applied: Vec<ReservationLine> = Vec::with_capacity(lines.len());
        let mut failure = None;
        for line in lines {
            let decremented = match self.try_decrement(line.product_id, line.quantity).await {
                Ok(decremented) => decremented,
                Err(error) => {
                    self.reverse(&applied).await?;
                    return Err(error);
                }
            };
            match decremented {
                DecrementOutcome::Applied { .. } => applied.push(*line),
                DecrementOutcome::Insufficient { .. } => {
                    failure = Some(ReservationFailureReason::InsufficientStock);
                    break;
                }
                DecrementOutcome::UnknownProduct => {
                    failure = Some(ReservationFailureReason::UnknownProduct);
                    break;
                }
            }
        }

        let outcome = match failure {
            None => ReservationOutcome::Reserved,
            Some(reason) => {
                self.reverse(&applied).await?;
                ReservationOutcome::Failed(reason)
            }
        };

        let recorded = match self.record_reservation(order_id, outcome).await {
            Ok(recorded) => recorded,
            Err(error) => {
                if outcome.is_reserved() {
                    self.reverse(&applied).await?;
                }
                return Err(error);
            }
        };
        if recorded {
            return Ok(Reservation {
                outcome,
                replayed: false,
            });
        }

        // Lost the race against another delivery of the same order.
        if outcome.is_reserved() {
            self.reverse(&applied).await?;
        }
        let recorded = self.reservation(order_id).await?.unwrap_or(outcome);
        Ok(Reservation {
            outcome: recorded,
            replayed: true,
        })
    }

    /// Increments every line back.
    ///
    /// Transient failures are retried per line. A line that still fails does
    /// not stop the remaining lines from being restored; the first error is
    /// returned once all lines were attempted.
    async fn reverse(&self, lines: &[ReservationLine]) -> Result<(), StoreError> {
        let strategy =
            RetryStrategy::exponential(5, Duration::from_millis(20), Duration::from_millis(500));
        let mut first_error = None;
        for line in lines {
            let restored = retry(&strategy, "inventory.increment", StoreError::is_transient, || {
                self.increment(line.product_id, line.quantity)
            })
            .await;
            if let Err(error) = restored {
                let error = error.into_inner();
                tracing::error!(
                    product_id = %line.product_id,
                    quantity = line.quantity,
                    error = %error,
                    "failed to restore reserved stock"
                );
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Persistence for payments. At most one payment per order.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts the record, or returns the existing payment for its order.
    async fn create(&self, record: &PaymentRecord) -> Result<PaymentInsert, StoreError>;

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<PaymentRecord>, StoreError>;

    /// Payments of a user, newest first.
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<PaymentRecord>, StoreError>;
}
