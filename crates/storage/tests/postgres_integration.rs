//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p storage --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{Money, OrderId, ProductId, ReservationFailureReason, UserId};
use domain::{
    DecrementOutcome, InventoryRecord, InventoryStore, Order, OrderItem, OrderStatus, OrderStore,
    PaymentInsert, PaymentRecord, PaymentStore, ReservationLine, ReservationOutcome,
    TransitionOutcome,
};
use serial_test::serial;
use sqlx::PgPool;
use storage::{PgInventoryStore, PgOrderStore, PgPaymentStore};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_fulfillment_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh pool with cleared tables
async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE orders, inventory, inventory_reservations, payments")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

fn order() -> Order {
    Order::new(
        UserId::new(),
        vec![
            OrderItem::new(ProductId::new(1001), 2, Money::from_cents(100)).unwrap(),
            OrderItem::new(ProductId::new(1002), 1, Money::from_cents(50)).unwrap(),
        ],
    )
    .unwrap()
}

async fn stocked_inventory(pool: &PgPool, stock: &[(i64, i64)]) -> PgInventoryStore {
    let store = PgInventoryStore::new(pool.clone());
    for &(product, quantity) in stock {
        store
            .upsert(&InventoryRecord::new(
                ProductId::new(product),
                format!("product-{product}"),
                Money::from_cents(100),
                quantity,
            ))
            .await
            .unwrap();
    }
    store
}

fn line(product: i64, quantity: i64) -> ReservationLine {
    ReservationLine {
        product_id: ProductId::new(product),
        quantity,
    }
}

mod orders {
    use super::*;

    #[tokio::test]
    #[serial]
    async fn create_and_get_round_trips_items() {
        let store = PgOrderStore::new(get_test_pool().await);
        let order = order();

        store.create(&order).await.unwrap();
        let loaded = store.get(order.id).await.unwrap().unwrap();

        assert_eq!(loaded.id, order.id);
        assert_eq!(loaded.items, order.items);
        assert_eq!(loaded.total_price, Money::from_cents(250));
        assert_eq!(loaded.status, OrderStatus::Pending);
        assert!(store.get(OrderId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    #[serial]
    async fn transition_is_conditional_on_current_status() {
        let store = PgOrderStore::new(get_test_pool().await);
        let order = order();
        store.create(&order).await.unwrap();

        let outcome = store
            .transition(order.id, OrderStatus::Processing, Utc::now())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            TransitionOutcome::Applied(ref o) if o.status == OrderStatus::Processing
        ));

        let outcome = store
            .transition(order.id, OrderStatus::Processing, Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Unchanged(_)));

        store
            .transition(order.id, OrderStatus::Completed, Utc::now())
            .await
            .unwrap();
        let outcome = store
            .transition(order.id, OrderStatus::Cancelled, Utc::now())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            TransitionOutcome::Unchanged(ref o) if o.status == OrderStatus::Completed
        ));

        let outcome = store
            .transition(OrderId::new(), OrderStatus::Completed, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::NotFound);
    }

    #[tokio::test]
    #[serial]
    async fn list_stale_unfinished_skips_fresh_and_settled_orders() {
        let store = PgOrderStore::new(get_test_pool().await);
        let old = Order::new_at(
            UserId::new(),
            order().items,
            Utc::now() - chrono::Duration::minutes(10),
        )
        .unwrap();
        let settled = Order::new_at(
            UserId::new(),
            order().items,
            Utc::now() - chrono::Duration::minutes(10),
        )
        .unwrap();
        let locked = Order::new_at(
            UserId::new(),
            order().items,
            Utc::now() - chrono::Duration::minutes(8),
        )
        .unwrap();
        store.create(&old).await.unwrap();
        store.create(&settled).await.unwrap();
        store.create(&locked).await.unwrap();
        store.create(&order()).await.unwrap();
        store
            .transition(
                settled.id,
                OrderStatus::Cancelled,
                Utc::now() - chrono::Duration::minutes(9),
            )
            .await
            .unwrap();
        store
            .transition(
                locked.id,
                OrderStatus::Processing,
                Utc::now() - chrono::Duration::minutes(7),
            )
            .await
            .unwrap();

        let stale = store
            .list_stale_unfinished(Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();

        let ids: Vec<_> = stale.iter().map(|o| o.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&old.id));
        assert!(ids.contains(&locked.id));
        assert!(!ids.contains(&settled.id));
    }
}

mod inventory {
    use super::*;

    #[tokio::test]
    #[serial]
    async fn decrement_never_goes_below_zero() {
        let pool = get_test_pool().await;
        let store = stocked_inventory(&pool, &[(1001, 3)]).await;

        assert_eq!(
            store.try_decrement(ProductId::new(1001), 2).await.unwrap(),
            DecrementOutcome::Applied { remaining: 1 }
        );
        assert_eq!(
            store.try_decrement(ProductId::new(1001), 2).await.unwrap(),
            DecrementOutcome::Insufficient { available: 1 }
        );
        assert_eq!(
            store.try_decrement(ProductId::new(4242), 1).await.unwrap(),
            DecrementOutcome::UnknownProduct
        );
    }

    #[tokio::test]
    #[serial]
    async fn failed_reservation_leaves_stock_untouched() {
        let pool = get_test_pool().await;
        let store = stocked_inventory(&pool, &[(1001, 10), (1002, 1)]).await;
        let order_id = OrderId::new();

        let reservation = store
            .reserve_order(order_id, &[line(1001, 2), line(1002, 2)])
            .await
            .unwrap();

        assert_eq!(
            reservation.outcome,
            ReservationOutcome::Failed(ReservationFailureReason::InsufficientStock)
        );
        let first = store.get(ProductId::new(1001)).await.unwrap().unwrap();
        assert_eq!(first.quantity, 10);
        assert_eq!(
            store.reservation(order_id).await.unwrap(),
            Some(reservation.outcome)
        );
    }

    #[tokio::test]
    #[serial]
    async fn redelivered_reservation_is_replayed() {
        let pool = get_test_pool().await;
        let store = stocked_inventory(&pool, &[(1001, 10)]).await;
        let order_id = OrderId::new();

        let first = store
            .reserve_order(order_id, &[line(1001, 2)])
            .await
            .unwrap();
        let again = store
            .reserve_order(order_id, &[line(1001, 2)])
            .await
            .unwrap();

        assert!(!first.replayed);
        assert!(again.replayed);
        assert_eq!(again.outcome, ReservationOutcome::Reserved);
        let record = store.get(ProductId::new(1001)).await.unwrap().unwrap();
        assert_eq!(record.quantity, 8);
    }

    #[tokio::test]
    #[serial]
    async fn concurrent_reservations_never_oversell() {
        let pool = get_test_pool().await;
        let store = stocked_inventory(&pool, &[(1001, 100)]).await;

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .reserve_order(OrderId::new(), &[line(1001, 60)])
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut reserved = 0;
        for handle in handles {
            if handle.await.unwrap().outcome.is_reserved() {
                reserved += 1;
            }
        }

        assert_eq!(reserved, 1);
        let record = store.get(ProductId::new(1001)).await.unwrap().unwrap();
        assert_eq!(record.quantity, 40);
    }

    #[tokio::test]
    #[serial]
    async fn list_pages_in_product_order() {
        let pool = get_test_pool().await;
        let store = stocked_inventory(&pool, &[(1003, 1), (1001, 1), (1002, 1)]).await;

        let page = store.list(0, 2).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|r| r.product_id.as_i64()).collect();
        assert_eq!(ids, vec![1001, 1002]);
        assert_eq!(store.list(2, 2).await.unwrap().len(), 1);
    }
}

mod payments {
    use super::*;

    #[tokio::test]
    #[serial]
    async fn second_payment_for_an_order_returns_the_first() {
        let store = PgPaymentStore::new(get_test_pool().await);
        let order_id = OrderId::new();
        let user_id = UserId::new();
        let first = PaymentRecord::new(order_id, user_id, Money::from_cents(200));

        assert!(matches!(
            store.create(&first).await.unwrap(),
            PaymentInsert::Inserted(_)
        ));
        let second = store
            .create(&PaymentRecord::new(order_id, user_id, Money::from_cents(200)))
            .await
            .unwrap();

        match second {
            PaymentInsert::AlreadyExists(existing) => {
                assert_eq!(existing.payment_id, first.payment_id)
            }
            other => panic!("expected existing payment, got {other:?}"),
        }
        assert_eq!(store.list_by_user(user_id).await.unwrap().len(), 1);
    }
}
