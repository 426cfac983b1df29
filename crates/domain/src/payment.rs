//! Payment records.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, UserId};
use serde::{Deserialize, Serialize};

/// A captured payment. Write-once, at most one per order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total_price: Money,
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Creates a new record with a fresh payment id.
    pub fn new(order_id: OrderId, user_id: UserId, total_price: Money) -> Self {
        Self {
            payment_id: PaymentId::new(),
            order_id,
            user_id,
            total_price,
            created_at: Utc::now(),
        }
    }
}

/// Result of inserting a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentInsert {
    Inserted(PaymentRecord),
    /// The order already had a payment; the stored record is returned.
    AlreadyExists(PaymentRecord),
}

impl PaymentInsert {
    /// Returns the record that is now stored for the order.
    pub fn record(&self) -> &PaymentRecord {
        match self {
            PaymentInsert::Inserted(record) | PaymentInsert::AlreadyExists(record) => record,
        }
    }

    pub fn into_record(self) -> PaymentRecord {
        match self {
            PaymentInsert::Inserted(record) | PaymentInsert::AlreadyExists(record) => record,
        }
    }
}
