//! Payment capture: records exactly one payment per reserved order and
//! announces `payment.completed`.

use std::sync::Arc;

use async_trait::async_trait;
use broker::{
    EventEnvelope, EventPublisher, FulfillmentEvent, InventoryLocked, MessageHandler,
    PaymentCompleted, topics,
};
use common::{OrderId, RetryStrategy, Telemetry, UserId};
use domain::{PaymentInsert, PaymentRecord, PaymentStore};

use crate::error::{FulfillmentError, Result};
use crate::retry::{default_store_retry, with_store_retry};

pub struct PaymentCapture {
    payments: Arc<dyn PaymentStore>,
    publisher: EventPublisher,
    store_retry: RetryStrategy,
    telemetry: Telemetry,
}

impl PaymentCapture {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        publisher: EventPublisher,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            payments,
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

    /// Records the payment for a reserved order and publishes
    /// `payment.completed` with its id.
    ///
    /// If the order already has a payment the stored record is announced
    /// again; no second payment is created.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn capture(&self, event: &InventoryLocked) -> Result<PaymentRecord> {
        if event.total_price.is_negative() {
            return Err(FulfillmentError::MalformedEvent(format!(
                "negative total_price {}",
                event.total_price
            )));
        }

        let existing = with_store_retry(&self.store_retry, "payment_get", || {
            self.payments.get_by_order(event.order_id)
        })
        .await?;

        let record = match existing {
            Some(record) => {
                self.telemetry.incr("payments_replayed_total");
                record
            }
            None => {
                let candidate =
                    PaymentRecord::new(event.order_id, event.user_id, event.total_price);
                let inserted = with_store_retry(&self.store_retry, "payment_create", || {
                    self.payments.create(&candidate)
                })
                .await?;
                match inserted {
                    PaymentInsert::Inserted(record) => {
                        self.telemetry.incr("payments_captured_total");
                        tracing::info!(
                            payment_id = %record.payment_id,
                            total_price = record.total_price.cents(),
                            "payment captured"
                        );
                        record
                    }
                    PaymentInsert::AlreadyExists(record) => {
                        self.telemetry.incr("payments_replayed_total");
                        record
                    }
                }
            }
        };

        let completed = FulfillmentEvent::PaymentCompleted(PaymentCompleted {
            payment_id: record.payment_id,
            order_id: record.order_id,
            user_id: record.user_id,
            total_price: record.total_price,
        });
        self.publisher.publish(&completed).await?;
        Ok(record)
    }

    pub async fn payment_for_order(&self, order_id: OrderId) -> Result<Option<PaymentRecord>> {
        Ok(
            with_store_retry(&self.store_retry, "payment_get", || {
                self.payments.get_by_order(order_id)
            })
            .await?,
        )
    }

    /// Payments of a user, newest first.
    pub async fn payments_for_user(&self, user_id: UserId) -> Result<Vec<PaymentRecord>> {
        Ok(
            with_store_retry(&self.store_retry, "payment_list", || {
                self.payments.list_by_user(user_id)
            })
            .await?,
        )
    }
}

#[async_trait]
impl MessageHandler for PaymentCapture {
    type Error = FulfillmentError;

    fn name(&self) -> &'static str {
        "payment-capture"
    }

    fn binding_keys(&self) -> Vec<String> {
        vec![topics::INVENTORY_LOCKED.to_string()]
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        match &envelope.event {
            FulfillmentEvent::InventoryLocked(event) => self.capture(event).await.map(|_| ()),
            other => {
                tracing::debug!(event_type = other.event_type(), "ignoring event");
                Ok(())
            }
        }
    }
}
