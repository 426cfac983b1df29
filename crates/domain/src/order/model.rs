//! Order and order item.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::OrderStatus;
use crate::error::ValidationError;

/// A line item of an order. Immutable once attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Unit price in minor units.
    pub price: Money,
}

impl OrderItem {
    /// Creates a validated order item.
    pub fn new(product_id: ProductId, quantity: i64, price: Money) -> Result<Self, ValidationError> {
        let item = Self {
            product_id,
            quantity,
            price,
        };
        item.validate()?;
        Ok(item)
    }

    /// Checks that the quantity is positive and the price is not negative.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.quantity <= 0 {
            return Err(ValidationError::InvalidQuantity {
                product_id: self.product_id,
                quantity: self.quantity,
            });
        }
        if self.price.is_negative() {
            return Err(ValidationError::InvalidPrice {
                product_id: self.product_id,
                price: self.price,
            });
        }
        Ok(())
    }

    /// Returns `price * quantity`, or None on overflow.
    pub fn line_total(&self) -> Option<Money> {
        self.price.checked_mul(self.quantity)
    }
}

/// An order placed by a user.
///
/// `total_price` is computed once at creation from the items and never
/// recomputed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub total_price: Money,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new `pending` order with a fresh id.
    pub fn new(user_id: UserId, items: Vec<OrderItem>) -> Result<Self, ValidationError> {
        Self::new_at(user_id, items, Utc::now())
    }

    /// Creates a new `pending` order stamped with the given time.
    pub fn new_at(
        user_id: UserId,
        items: Vec<OrderItem>,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let total_price = Self::compute_total(&items)?;
        Ok(Self {
            id: OrderId::new(),
            user_id,
            items,
            total_price,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    /// Validates every item and sums the line totals.
    pub fn compute_total(items: &[OrderItem]) -> Result<Money, ValidationError> {
        if items.is_empty() {
            return Err(ValidationError::NoItems);
        }
        items.iter().try_fold(Money::zero(), |total, item| {
            item.validate()?;
            item.line_total()
                .and_then(|line| total.checked_add(line))
                .ok_or(ValidationError::TotalOverflow)
        })
    }

    /// Returns true if the order reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns a copy moved to `status` if the state machine allows it.
    pub fn transitioned(&self, status: OrderStatus, at: DateTime<Utc>) -> Option<Order> {
        if !self.status.can_transition_to(status) {
            return None;
        }
        Some(Order {
            status,
            updated_at: at,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product: i64, quantity: i64, price: i64) -> OrderItem {
        OrderItem {
            product_id: ProductId::new(product),
            quantity,
            price: Money::from_cents(price),
        }
    }

    #[test]
    fn new_order_is_pending_with_computed_total() {
        let order = Order::new(UserId::new(), vec![item(1001, 2, 100), item(1002, 1, 50)]).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_price, Money::from_cents(250));
        assert_eq!(order.created_at, order.updated_at);
    }

    #[test]
    fn empty_orders_are_rejected() {
        assert_eq!(
            Order::new(UserId::new(), vec![]).unwrap_err(),
            ValidationError::NoItems
        );
    }

    #[test]
    fn non_positive_quantities_are_rejected() {
        for quantity in [0, -1] {
            let err = Order::new(UserId::new(), vec![item(1001, quantity, 100)]).unwrap_err();
            assert!(matches!(err, ValidationError::InvalidQuantity { .. }));
        }
    }

    #[test]
    fn negative_prices_are_rejected_but_free_items_are_not() {
        let err = Order::new(UserId::new(), vec![item(1001, 1, -1)]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPrice { .. }));

        let free = Order::new(UserId::new(), vec![item(1001, 3, 0)]).unwrap();
        assert_eq!(free.total_price, Money::zero());
    }

    #[test]
    fn total_overflow_is_a_validation_error() {
        let err = Order::new(UserId::new(), vec![item(1001, 2, i64::MAX)]).unwrap_err();
        assert_eq!(err, ValidationError::TotalOverflow);

        let err = Order::new(
            UserId::new(),
            vec![item(1001, 1, i64::MAX), item(1002, 1, 1)],
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::TotalOverflow);
    }

    #[test]
    fn transitioned_obeys_the_state_machine() {
        let order = Order::new(UserId::new(), vec![item(1001, 1, 100)]).unwrap();
        let later = order.created_at + chrono::Duration::seconds(5);

        let processing = order.transitioned(OrderStatus::Processing, later).unwrap();
        assert_eq!(processing.status, OrderStatus::Processing);
        assert_eq!(processing.updated_at, later);
        assert_eq!(processing.total_price, order.total_price);

        let completed = processing
            .transitioned(OrderStatus::Completed, later)
            .unwrap();
        assert!(completed.is_terminal());
        assert!(completed
            .transitioned(OrderStatus::Cancelled, later)
            .is_none());
    }

    #[test]
    fn order_items_accept_valid_input() {
        let item = OrderItem::new(ProductId::new(1003), 4, Money::from_cents(25)).unwrap();
        assert_eq!(item.line_total(), Some(Money::from_cents(100)));
        assert!(OrderItem::new(ProductId::new(1003), 0, Money::zero()).is_err());
    }
}
