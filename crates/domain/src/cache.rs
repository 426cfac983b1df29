//! Order cache capability.

use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;

use crate::error::CacheError;
use crate::order::Order;

/// Returns the cache key for an order: `order_<id>`.
pub fn cache_key(id: OrderId) -> String {
    format!("order_{id}")
}

/// Expiring key-value cache in front of the order store.
#[async_trait]
pub trait OrderCache: Send + Sync {
    async fn get(&self, id: OrderId) -> Result<Option<Order>, CacheError>;

    /// Stores the order under [`cache_key`], replacing any previous entry.
    async fn set(&self, order: &Order, ttl: Duration) -> Result<(), CacheError>;
}
