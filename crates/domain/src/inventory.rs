//! Inventory records and reservation outcomes.

use common::{Money, ProductId, ReservationFailureReason};
use serde::{Deserialize, Serialize};

/// Stock on hand for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub product_id: ProductId,
    pub product_name: String,
    pub price: Money,
    /// Never negative.
    pub quantity: i64,
}

impl InventoryRecord {
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        price: Money,
        quantity: i64,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            price,
            quantity,
        }
    }
}

/// One product and quantity to take out of stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Result of a single conditional decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    Applied { remaining: i64 },
    Insufficient { available: i64 },
    UnknownProduct,
}

/// Ledger entry recorded once per order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationOutcome {
    Reserved,
    Failed(ReservationFailureReason),
}

impl ReservationOutcome {
    pub fn is_reserved(&self) -> bool {
        matches!(self, ReservationOutcome::Reserved)
    }

    /// Returns the ledger representation: `reserved` or the failure reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationOutcome::Reserved => "reserved",
            ReservationOutcome::Failed(reason) => reason.as_str(),
        }
    }
}

impl std::fmt::Display for ReservationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "reserved" {
            return Ok(ReservationOutcome::Reserved);
        }
        s.parse().map(ReservationOutcome::Failed)
    }
}

/// The outcome of reserving a whole order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub outcome: ReservationOutcome,
    /// True if the ledger already held an outcome and stock was not touched.
    pub replayed: bool,
}
