//! In-memory stores.
//!
//! Stock counters are `AtomicI64`s updated with compare-and-swap, so
//! concurrent reservations of the same product never need an exclusive lock
//! and can never drive a quantity below zero.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use domain::{
    DecrementOutcome, InventoryRecord, InventoryStore, Order, OrderStatus, OrderStore,
    PaymentInsert, PaymentRecord, PaymentStore, ReservationOutcome, StoreError,
    TransitionOutcome,
};
use parking_lot::RwLock;

/// Fault injection shared by the in-memory stores.
#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    fail_next: AtomicU32,
}

impl Faults {
    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is down".to_string()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

macro_rules! fault_hooks {
    ($store:ty) => {
        impl $store {
            /// Makes every operation fail with [`StoreError::Unavailable`].
            pub fn set_unavailable(&self, unavailable: bool) {
                self.faults.unavailable.store(unavailable, Ordering::SeqCst);
            }

            /// Fails the next `count` operations with [`StoreError::Unavailable`].
            pub fn fail_next(&self, count: u32) {
                self.faults.fail_next.store(count, Ordering::SeqCst);
            }
        }
    };
}

/// In-memory order store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    faults: Arc<Faults>,
}

impl InMemoryOrderStore {
    /// Creates a new in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored orders.
    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }

    /// Overwrites a stored order, bypassing the state machine.
    pub fn put(&self, order: Order) {
        self.orders.write().insert(order.id, order);
    }
}

fault_hooks!(InMemoryOrderStore);

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: &Order) -> Result<(), StoreError> {
        self.faults.check()?;
        let mut orders = self.orders.write();
        if orders.contains_key(&order.id) {
            return Err(StoreError::Backend(format!("order {} already exists", order.id)));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.faults.check()?;
        Ok(self.orders.read().get(&id).cloned())
    }

    async fn transition(
        &self,
        id: OrderId,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        self.faults.check()?;
        let mut orders = self.orders.write();
        let Some(order) = orders.get_mut(&id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        match order.transitioned(to, at) {
            Some(updated) => {
                *order = updated.clone();
                Ok(TransitionOutcome::Applied(updated))
            }
            None => Ok(TransitionOutcome::Unchanged(order.clone())),
        }
    }

    async fn list_stale_unfinished(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError> {
        self.faults.check()?;
        let mut stale: Vec<Order> = self
            .orders
            .read()
            .values()
            .filter(|o| !o.status.is_terminal() && o.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|o| o.created_at);
        Ok(stale)
    }
}

#[derive(Debug)]
struct StockSlot {
    product_name: String,
    price: common::Money,
    quantity: AtomicI64,
}

#[derive(Debug, Default)]
struct InventoryState {
    products: BTreeMap<ProductId, StockSlot>,
    ledger: HashMap<OrderId, ReservationOutcome>,
}

/// In-memory inventory store with lock-free conditional decrements.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<RwLock<InventoryState>>,
    faults: Arc<Faults>,
}

impl InMemoryInventoryStore {
    /// Creates a new, empty inventory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `records`.
    pub fn with_records(records: impl IntoIterator<Item = InventoryRecord>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write();
            for record in records {
                state.products.insert(record.product_id, slot(&record));
            }
        }
        store
    }

    /// Returns the quantity on hand, if the product exists.
    pub fn quantity(&self, product_id: ProductId) -> Option<i64> {
        self.state
            .read()
            .products
            .get(&product_id)
            .map(|s| s.quantity.load(Ordering::SeqCst))
    }

    /// Returns the number of reservation ledger entries.
    pub fn ledger_len(&self) -> usize {
        self.state.read().ledger.len()
    }
}

fault_hooks!(InMemoryInventoryStore);

fn slot(record: &InventoryRecord) -> StockSlot {
    StockSlot {
        product_name: record.product_name.clone(),
        price: record.price,
        quantity: AtomicI64::new(record.quantity),
    }
}

fn record(product_id: ProductId, slot: &StockSlot) -> InventoryRecord {
    InventoryRecord {
        product_id,
        product_name: slot.product_name.clone(),
        price: slot.price,
        quantity: slot.quantity.load(Ordering::SeqCst),
    }
}

fn ensure_positive(quantity: i64) -> Result<(), StoreError> {
    if quantity <= 0 {
        return Err(StoreError::Backend(format!(
            "quantity must be positive, got {quantity}"
        )));
    }
    Ok(())
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn get(&self, product_id: ProductId) -> Result<Option<InventoryRecord>, StoreError> {
        self.faults.check()?;
        Ok(self
            .state
            .read()
            .products
            .get(&product_id)
            .map(|s| record(product_id, s)))
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<InventoryRecord>, StoreError> {
        self.faults.check()?;
        let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(self
            .state
            .read()
            .products
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(id, s)| record(*id, s))
            .collect())
    }

    async fn upsert(&self, record: &InventoryRecord) -> Result<(), StoreError> {
        self.faults.check()?;
        if record.quantity < 0 {
            return Err(StoreError::Backend("quantity must not be negative".to_string()));
        }
        self.state
            .write()
            .products
            .insert(record.product_id, slot(record));
        Ok(())
    }

    async fn try_decrement(
        &self,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<DecrementOutcome, StoreError> {
        self.faults.check()?;
        ensure_positive(quantity)?;
        let state = self.state.read();
        let Some(slot) = state.products.get(&product_id) else {
            return Ok(DecrementOutcome::UnknownProduct);
        };
        let swapped = slot
            .quantity
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |on_hand| {
                on_hand.checked_sub(quantity).filter(|left| *left >= 0)
            });
        Ok(match swapped {
            Ok(previous) => DecrementOutcome::Applied {
                remaining: previous - quantity,
            },
            Err(available) => DecrementOutcome::Insufficient { available },
        })
    }

    async fn increment(&self, product_id: ProductId, quantity: i64) -> Result<(), StoreError> {
        self.faults.check()?;
        ensure_positive(quantity)?;
        let state = self.state.read();
        let slot = state
            .products
            .get(&product_id)
            .ok_or_else(|| StoreError::Backend(format!("unknown product {product_id}")))?;
        slot.quantity.fetch_add(quantity, Ordering::SeqCst);
        Ok(())
    }

    async fn reservation(
        &self,
        order_id: OrderId,
    ) -> Result<Option<ReservationOutcome>, StoreError> {
        self.faults.check()?;
        Ok(self.state.read().ledger.get(&order_id).copied())
    }

    async fn record_reservation(
        &self,
        order_id: OrderId,
        outcome: ReservationOutcome,
    ) -> Result<bool, StoreError> {
        self.faults.check()?;
        let mut state = self.state.write();
        if state.ledger.contains_key(&order_id) {
            return Ok(false);
        }
        state.ledger.insert(order_id, outcome);
        Ok(true)
    }
}

/// In-memory payment store keyed by order id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<OrderId, PaymentRecord>>>,
    faults: Arc<Faults>,
}

impl InMemoryPaymentStore {
    /// Creates a new in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored payments.
    pub fn len(&self) -> usize {
        self.payments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.payments.read().is_empty()
    }
}

fault_hooks!(InMemoryPaymentStore);

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create(&self, record: &PaymentRecord) -> Result<PaymentInsert, StoreError> {
        self.faults.check()?;
        let mut payments = self.payments.write();
        if let Some(existing) = payments.get(&record.order_id) {
            return Ok(PaymentInsert::AlreadyExists(existing.clone()));
        }
        payments.insert(record.order_id, record.clone());
        Ok(PaymentInsert::Inserted(record.clone()))
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<PaymentRecord>, StoreError> {
        self.faults.check()?;
        Ok(self.payments.read().get(&order_id).cloned())
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<PaymentRecord>, StoreError> {
        self.faults.check()?;
        let mut payments: Vec<PaymentRecord> = self
            .payments
            .read()
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }
}
