//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Processing ──┬──► Completed
///           │                 └──► Cancelled
///           ├──► Completed
///           └──► Cancelled
/// ```
///
/// The direct edges out of `Pending` exist because settlement events may
/// arrive before the reservation event that moves an order to `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Persisted, waiting for inventory.
    #[default]
    Pending,

    /// Inventory reserved, waiting for payment.
    Processing,

    /// Payment captured (terminal state).
    Completed,

    /// Reservation failed or cancelled by an operator (terminal state).
    Cancelled,
}

impl OrderStatus {
    const FROM_OPEN: &'static [OrderStatus] = &[OrderStatus::Pending, OrderStatus::Processing];
    const FROM_PENDING: &'static [OrderStatus] = &[OrderStatus::Pending];

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Returns true if an order in this status may move to `target`.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        target.predecessors().contains(self)
    }

    /// Statuses from which this status can be entered.
    pub fn predecessors(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[],
            OrderStatus::Processing => Self::FROM_PENDING,
            OrderStatus::Completed | OrderStatus::Cancelled => Self::FROM_OPEN,
        }
    }

    /// Returns the status name as written to stores and the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}
