//! Integration tests for the all-or-nothing order reservation built on top of
//! the `InventoryStore` primitives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use common::{Money, OrderId, ProductId, ReservationFailureReason};
use domain::{
    DecrementOutcome, InventoryRecord, InventoryStore, ReservationLine, ReservationOutcome,
    StoreError,
};
use parking_lot::Mutex;

/// Minimal inventory store exposing only the primitives.
#[derive(Default)]
struct FakeInventory {
    stock: Mutex<HashMap<ProductId, i64>>,
    ledger: Mutex<HashMap<OrderId, ReservationOutcome>>,
    fail_on_product: Mutex<Option<ProductId>>,
    lose_ledger_race: AtomicBool,
    fail_record_once: AtomicBool,
    failing_increments: AtomicU32,
    decrements: AtomicU32,
}

impl FakeInventory {
    fn with_stock(stock: &[(i64, i64)]) -> Self {
        let fake = Self::default();
        for &(product, quantity) in stock {
            fake.stock.lock().insert(ProductId::new(product), quantity);
        }
        fake
    }

    fn quantity(&self, product: i64) -> i64 {
        self.stock.lock()[&ProductId::new(product)]
    }
}

#[async_trait]
impl InventoryStore for FakeInventory {
    async fn get(&self, product_id: ProductId) -> Result<Option<InventoryRecord>, StoreError> {
        Ok(self.stock.lock().get(&product_id).map(|&quantity| {
            InventoryRecord::new(product_id, "item", Money::zero(), quantity)
        }))
    }

    async fn list(&self, _offset: i64, _limit: i64) -> Result<Vec<InventoryRecord>, StoreError> {
        Ok(Vec::new())
    }

    async fn upsert(&self, record: &InventoryRecord) -> Result<(), StoreError> {
        self.stock.lock().insert(record.product_id, record.quantity);
        Ok(())
    }

    async fn try_decrement(
        &self,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<DecrementOutcome, StoreError> {
        if *self.fail_on_product.lock() == Some(product_id) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.decrements.fetch_add(1, Ordering::SeqCst);
        let mut stock = self.stock.lock();
        let Some(on_hand) = stock.get_mut(&product_id) else {
            return Ok(DecrementOutcome::UnknownProduct);
        };
        if *on_hand < quantity {
            return Ok(DecrementOutcome::Insufficient {
                available: *on_hand,
            });
        }
        *on_hand -= quantity;
        Ok(DecrementOutcome::Applied {
            remaining: *on_hand,
        })
    }

    async fn increment(&self, product_id: ProductId, quantity: i64) -> Result<(), StoreError> {
        let failing = self
            .failing_increments
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Timeout("pool exhausted".into()));
        }
        *self.stock.lock().entry(product_id).or_default() += quantity;
        Ok(())
    }

    async fn reservation(
        &self,
        order_id: OrderId,
    ) -> Result<Option<ReservationOutcome>, StoreError> {
        Ok(self.ledger.lock().get(&order_id).copied())
    }

    async fn record_reservation(
        &self,
        order_id: OrderId,
        outcome: ReservationOutcome,
    ) -> Result<bool, StoreError> {
        if self.fail_record_once.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        let mut ledger = self.ledger.lock();
        if self.lose_ledger_race.load(Ordering::SeqCst) {
            ledger.insert(
                order_id,
                ReservationOutcome::Failed(ReservationFailureReason::InsufficientStock),
            );
            return Ok(false);
        }
        if ledger.contains_key(&order_id) {
            return Ok(false);
        }
        ledger.insert(order_id, outcome);
        Ok(true)
    }
}

fn line(product: i64, quantity: i64) -> ReservationLine {
    ReservationLine {
        product_id: ProductId::new(product),
        quantity,
    }
}

#[tokio::test]
async fn reserves_every_line() {
    let store = FakeInventory::with_stock(&[(1001, 10), (1002, 5)]);
    let order_id = OrderId::new();

    let reservation = store
        .reserve_order(order_id, &[line(1001, 2), line(1002, 5)])
        .await
        .unwrap();

    assert_eq!(reservation.outcome, ReservationOutcome::Reserved);
    assert!(!reservation.replayed);
    assert_eq!(store.quantity(1001), 8);
    assert_eq!(store.quantity(1002), 0);
    assert_eq!(
        store.reservation(order_id).await.unwrap(),
        Some(ReservationOutcome::Reserved)
    );
}

#[tokio::test]
async fn insufficient_stock_reverses_earlier_lines() {
    let store = FakeInventory::with_stock(&[(1001, 10), (1002, 1)]);

    let reservation = store
        .reserve_order(OrderId::new(), &[line(1001, 2), line(1002, 2)])
        .await
        .unwrap();

    assert_eq!(
        reservation.outcome,
        ReservationOutcome::Failed(ReservationFailureReason::InsufficientStock)
    );
    assert_eq!(store.quantity(1001), 10);
    assert_eq!(store.quantity(1002), 1);
}

#[tokio::test]
async fn unknown_product_fails_the_reservation() {
    let store = FakeInventory::with_stock(&[(1001, 10)]);

    let reservation = store
        .reserve_order(OrderId::new(), &[line(1001, 3), line(4242, 1)])
        .await
        .unwrap();

    assert_eq!(
        reservation.outcome,
        ReservationOutcome::Failed(ReservationFailureReason::UnknownProduct)
    );
    assert_eq!(store.quantity(1001), 10);
}

#[tokio::test]
async fn redelivery_replays_the_recorded_outcome_without_touching_stock() {
    let store = FakeInventory::with_stock(&[(1001, 10)]);
    let order_id = OrderId::new();

    store
        .reserve_order(order_id, &[line(1001, 2)])
        .await
        .unwrap();
    let again = store
        .reserve_order(order_id, &[line(1001, 2)])
        .await
        .unwrap();

    assert!(again.replayed);
    assert_eq!(again.outcome, ReservationOutcome::Reserved);
    assert_eq!(store.quantity(1001), 8);
    assert_eq!(store.decrements.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn store_failure_mid_reservation_reverses_and_propagates() {
    let store = FakeInventory::with_stock(&[(1001, 10), (1002, 10)]);
    *store.fail_on_product.lock() = Some(ProductId::new(1002));
    let order_id = OrderId::new();

    let err = store
        .reserve_order(order_id, &[line(1001, 4), line(1002, 1)])
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(store.quantity(1001), 10);
    assert_eq!(store.reservation(order_id).await.unwrap(), None);
}

#[tokio::test]
async fn losing_the_ledger_race_undoes_this_attempt() {
    let store = FakeInventory::with_stock(&[(1001, 10)]);
    store.lose_ledger_race.store(true, Ordering::SeqCst);

    let reservation = store
        .reserve_order(OrderId::new(), &[line(1001, 4)])
        .await
        .unwrap();

    assert!(reservation.replayed);
    assert_eq!(
        reservation.outcome,
        ReservationOutcome::Failed(ReservationFailureReason::InsufficientStock)
    );
    assert_eq!(store.quantity(1001), 10);
}

#[tokio::test]
async fn failed_ledger_write_restores_stock_before_the_retry() {
    let store = FakeInventory::with_stock(&[(1001, 10)]);
    store.fail_record_once.store(true, Ordering::SeqCst);
    let order_id = OrderId::new();

    let err = store
        .reserve_order(order_id, &[line(1001, 2)])
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(store.quantity(1001), 10);
    assert_eq!(store.reservation(order_id).await.unwrap(), None);

    let retried = store
        .reserve_order(order_id, &[line(1001, 2)])
        .await
        .unwrap();
    assert_eq!(retried.outcome, ReservationOutcome::Reserved);
    assert!(!retried.replayed);
    assert_eq!(store.quantity(1001), 8);
}

#[tokio::test]
async fn failed_ledger_write_after_a_rejection_leaves_stock_untouched() {
    let store = FakeInventory::with_stock(&[(1001, 10), (1002, 0)]);
    store.fail_record_once.store(true, Ordering::SeqCst);

    let err = store
        .reserve_order(OrderId::new(), &[line(1001, 3), line(1002, 1)])
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(store.quantity(1001), 10);
}

#[tokio::test(start_paused = true)]
async fn reversal_retries_transient_increment_failures() {
    let store = FakeInventory::with_stock(&[(1001, 10), (1002, 10), (1003, 0)]);
    store.failing_increments.store(2, Ordering::SeqCst);

    let reservation = store
        .reserve_order(
            OrderId::new(),
            &[line(1001, 4), line(1002, 4), line(1003, 1)],
        )
        .await
        .unwrap();

    assert_eq!(
        reservation.outcome,
        ReservationOutcome::Failed(ReservationFailureReason::InsufficientStock)
    );
    assert_eq!(store.quantity(1001), 10);
    assert_eq!(store.quantity(1002), 10);
}
