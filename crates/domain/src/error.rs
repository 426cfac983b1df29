//! Domain error types.

use common::{Classify, ErrorClass, Money, ProductId};
use thiserror::Error;

/// Rejected input for a new order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Order must contain at least one item")]
    NoItems,

    #[error("Invalid quantity {quantity} for product {product_id}: must be positive")]
    InvalidQuantity { product_id: ProductId, quantity: i64 },

    #[error("Invalid price {price} for product {product_id}: must not be negative")]
    InvalidPrice { product_id: ProductId, price: Money },

    #[error("Order total overflows")]
    TotalOverflow,

    #[error("Malformed input: {0}")]
    Malformed(String),
}

impl Classify for ValidationError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Validation
    }
}

/// Errors raised by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection lost or pool exhausted.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation timed out: {0}")]
    Timeout(String),

    /// The backend rejected the operation.
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back into a model.
    #[error("Corrupt stored data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns true if retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        if self.is_transient() {
            ErrorClass::Transient
        } else {
            ErrorClass::Validation
        }
    }
}

/// Errors raised by [`OrderCache`](crate::OrderCache) implementations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Classify for CacheError {
    fn class(&self) -> ErrorClass {
        match self {
            CacheError::Unavailable(_) => ErrorClass::Transient,
            CacheError::Serialization(_) => ErrorClass::Validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_failures_are_transient() {
        assert!(StoreError::Unavailable("reset".into()).is_transient());
        assert!(StoreError::Timeout("pool".into()).is_transient());
        assert!(!StoreError::Backend("syntax".into()).is_transient());
        assert!(!StoreError::Corrupt("status".into()).is_transient());
        assert_eq!(
            StoreError::Backend("check".into()).class(),
            ErrorClass::Validation
        );
    }

    #[test]
    fn validation_messages_name_the_product() {
        let err = ValidationError::InvalidQuantity {
            product_id: ProductId::new(1001),
            quantity: 0,
        };
        assert_eq!(
            err.to_string(),
            "Invalid quantity 0 for product 1001: must be positive"
        );
        assert_eq!(err.class(), ErrorClass::Validation);
    }
}
