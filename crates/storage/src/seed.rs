//! Default product catalogue.

use common::{Money, ProductId};
use domain::{InventoryRecord, InventoryStore, StoreError};

/// Products every fresh deployment starts with.
pub fn default_catalogue() -> Vec<InventoryRecord> {
    vec![
        InventoryRecord::new(ProductId::new(1001), "IPhone11", Money::from_cents(799_999), 9999),
        InventoryRecord::new(ProductId::new(1002), "IPhone12", Money::from_cents(899_999), 9999),
        InventoryRecord::new(ProductId::new(1003), "IPhone13", Money::from_cents(999_999), 9999),
    ]
}

/// Inserts `records` if the store holds no products yet. Returns true if it seeded.
pub async fn seed_if_empty(
    store: &dyn InventoryStore,
    records: &[InventoryRecord],
) -> Result<bool, StoreError> {
    if !store.list(0, 1).await?.is_empty() {
        return Ok(false);
    }
    for record in records {
        store.upsert(record).await?;
    }
    tracing::info!(products = records.len(), "seeded inventory");
    Ok(true)
}
