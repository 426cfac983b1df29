//! PostgreSQL-backed stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, ProductId, ReservationFailureReason, UserId};
use domain::{
    DecrementOutcome, InventoryRecord, InventoryStore, Order, OrderItem, OrderStatus, OrderStore,
    PaymentInsert, PaymentRecord, PaymentStore, Reservation, ReservationLine, ReservationOutcome,
    StoreError, TransitionOutcome,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, user_id, items, total_price, status, created_at, updated_at";

/// Opens a connection pool.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(map_sqlx)
}

/// Runs the database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))
}

/// Maps a driver error onto the store taxonomy.
///
/// Connection loss, pool exhaustion, serialization failures and deadlocks are
/// transient; everything else is not.
pub(crate) fn map_sqlx(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Io(e) => StoreError::Unavailable(e.to_string()),
        sqlx::Error::Tls(e) => StoreError::Unavailable(e.to_string()),
        sqlx::Error::Protocol(message) => StoreError::Unavailable(message),
        sqlx::Error::PoolClosed => StoreError::Unavailable("connection pool closed".to_string()),
        sqlx::Error::WorkerCrashed => StoreError::Unavailable("database worker crashed".to_string()),
        sqlx::Error::PoolTimedOut => StoreError::Timeout("connection pool timed out".to_string()),
        sqlx::Error::Database(ref db)
            if matches!(db.code().as_deref(), Some("40001" | "40P01" | "57P01")) =>
        {
            StoreError::Unavailable(db.message().to_string())
        }
        e @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)) => StoreError::Corrupt(e.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

fn row_to_order(row: &PgRow) -> Result<Order, StoreError> {
    let items: serde_json::Value = row.try_get("items").map_err(map_sqlx)?;
    let items: Vec<OrderItem> = serde_json::from_value(items)?;
    let status: String = row.try_get("status").map_err(map_sqlx)?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id").map_err(map_sqlx)?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id").map_err(map_sqlx)?),
        items,
        total_price: Money::from_cents(row.try_get("total_price").map_err(map_sqlx)?),
        status: status.parse().map_err(StoreError::Corrupt)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx)?,
    })
}

/// PostgreSQL order store.
#[derive(Debug, Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, items, total_price, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(serde_json::to_value(&order.items)?)
        .bind(order.total_price.cents())
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn transition(
        &self,
        id: OrderId,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        let from: Vec<String> = to
            .predecessors()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let row = sqlx::query(&format!(
            r#"
            UPDATE orders SET status = $2, updated_at = $3
            WHERE id = $1 AND status = ANY($4)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(to.as_str())
        .bind(at)
        .bind(&from)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if let Some(row) = row {
            return Ok(TransitionOutcome::Applied(row_to_order(&row)?));
        }
        Ok(match self.get(id).await? {
            Some(current) => TransitionOutcome::Unchanged(current),
            None => TransitionOutcome::NotFound,
        })
    }

    async fn list_stale_unfinished(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE status IN ('pending', 'processing') AND updated_at < $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(row_to_order).collect()
    }
}

fn row_to_inventory(row: &PgRow) -> Result<InventoryRecord, StoreError> {
    Ok(InventoryRecord {
        product_id: ProductId::new(row.try_get("product_id").map_err(map_sqlx)?),
        product_name: row.try_get("product_name").map_err(map_sqlx)?,
        price: Money::from_cents(row.try_get("price").map_err(map_sqlx)?),
        quantity: row.try_get("quantity").map_err(map_sqlx)?,
    })
}

/// PostgreSQL inventory store.
///
/// Decrements are a single conditional `UPDATE`, and [`reserve_order`]
/// runs every decrement plus the ledger insert in one transaction.
///
/// [`reserve_order`]: InventoryStore::reserve_order
#[derive(Debug, Clone)]
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    /// Creates a new PostgreSQL inventory store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn decrement_on(
        conn: &mut PgConnection,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<DecrementOutcome, StoreError> {
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE inventory SET quantity = quantity - $2
            WHERE product_id = $1 AND quantity >= $2
            RETURNING quantity
            "#,
        )
        .bind(product_id.as_i64())
        .bind(quantity)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx)?;

        if let Some(remaining) = remaining {
            return Ok(DecrementOutcome::Applied { remaining });
        }

        let available: Option<i64> =
            sqlx::query_scalar("SELECT quantity FROM inventory WHERE product_id = $1")
                .bind(product_id.as_i64())
                .fetch_optional(&mut *conn)
                .await
                .map_err(map_sqlx)?;
        Ok(match available {
            Some(available) => DecrementOutcome::Insufficient { available },
            None => DecrementOutcome::UnknownProduct,
        })
    }

    async fn record_on(
        conn: &mut PgConnection,
        order_id: OrderId,
        outcome: ReservationOutcome,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO inventory_reservations (order_id, outcome)
            VALUES ($1, $2)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(outcome.as_str())
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn reservation_on(
        conn: &mut PgConnection,
        order_id: OrderId,
    ) -> Result<Option<ReservationOutcome>, StoreError> {
        let outcome: Option<String> =
            sqlx::query_scalar("SELECT outcome FROM inventory_reservations WHERE order_id = $1")
                .bind(order_id.as_uuid())
                .fetch_optional(&mut *conn)
                .await
                .map_err(map_sqlx)?;
        outcome
            .map(|o| o.parse().map_err(StoreError::Corrupt))
            .transpose()
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
impl InventoryStore for PgInventoryStore {
    async fn get(&self, product_id: ProductId) -> Result<Option<InventoryRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT product_id, product_name, price, quantity FROM inventory WHERE product_id = $1",
        )
        .bind(product_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.as_ref().map(row_to_inventory).transpose()
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<InventoryRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, product_name, price, quantity FROM inventory
            ORDER BY product_id
            OFFSET $1 LIMIT $2
            "#,
        )
        .bind(offset.max(0))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(row_to_inventory).collect()
    }

    async fn upsert(&self, record: &InventoryRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inventory (product_id, product_name, price, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (product_id) DO UPDATE
            SET product_name = EXCLUDED.product_name,
                price = EXCLUDED.price,
                quantity = EXCLUDED.quantity
            "#,
        )
        .bind(record.product_id.as_i64())
        .bind(&record.product_name)
        .bind(record.price.cents())
        .bind(record.quantity)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn try_decrement(
        &self,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<DecrementOutcome, StoreError> {
        ensure_positive(quantity)?;
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        Self::decrement_on(&mut conn, product_id, quantity).await
    }

    async fn increment(&self, product_id: ProductId, quantity: i64) -> Result<(), StoreError> {
        ensure_positive(quantity)?;
        let result = sqlx::query("UPDATE inventory SET quantity = quantity + $2 WHERE product_id = $1")
            .bind(product_id.as_i64())
            .bind(quantity)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!("unknown product {product_id}")));
        }
        Ok(())
    }

    async fn reservation(
        &self,
        order_id: OrderId,
    ) -> Result<Option<ReservationOutcome>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        Self::reservation_on(&mut conn, order_id).await
    }

    async fn record_reservation(
        &self,
        order_id: OrderId,
        outcome: ReservationOutcome,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        Self::record_on(&mut conn, order_id, outcome).await
    }

    async fn reserve_order(
        &self,
        order_id: OrderId,
        lines: &[ReservationLine],
    ) -> Result<Reservation, StoreError> {
        for line in lines {
            ensure_positive(line.quantity)?;
        }
        // Lock rows in a stable order so concurrent reservations cannot deadlock.
        let mut lines = lines.to_vec();
        lines.sort_by_key(|l| l.product_id);

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        if let Some(outcome) = Self::reservation_on(&mut tx, order_id).await? {
            tx.commit().await.map_err(map_sqlx)?;
            return Ok(Reservation {
                outcome,
                replayed: true,
            });
        }

        let mut failure = None;
        for line in &lines {
            match Self::decrement_on(&mut tx, line.product_id, line.quantity).await? {
                DecrementOutcome::Applied { .. } => {}
                DecrementOutcome::Insufficient { .. } => {
                    failure = Some(ReservationOutcome::Failed(
                        ReservationFailureReason::InsufficientStock,
                    ));
                    break;
                }
                DecrementOutcome::UnknownProduct => {
                    failure = Some(ReservationOutcome::Failed(
                        ReservationFailureReason::UnknownProduct,
                    ));
                    break;
                }
            }
        }

        let (outcome, mut tx) = match failure {
            None => (ReservationOutcome::Reserved, tx),
            Some(outcome) => {
                // Rolling back reverses every decrement made for this order.
                tx.rollback().await.map_err(map_sqlx)?;
                (outcome, self.pool.begin().await.map_err(map_sqlx)?)
            }
        };

        if Self::record_on(&mut tx, order_id, outcome).await? {
            tx.commit().await.map_err(map_sqlx)?;
            return Ok(Reservation {
                outcome,
                replayed: false,
            });
        }

        tx.rollback().await.map_err(map_sqlx)?;
        let recorded = self.reservation(order_id).await?.unwrap_or(outcome);
        Ok(Reservation {
            outcome: recorded,
            replayed: true,
        })
    }
}

fn row_to_payment(row: &PgRow) -> Result<PaymentRecord, StoreError> {
    Ok(PaymentRecord {
        payment_id: PaymentId::from_uuid(row.try_get::<Uuid, _>("payment_id").map_err(map_sqlx)?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id").map_err(map_sqlx)?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id").map_err(map_sqlx)?),
        total_price: Money::from_cents(row.try_get("total_price").map_err(map_sqlx)?),
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
    })
}

/// PostgreSQL payment store. The unique key on `order_id` enforces one
/// payment per order.
#[derive(Debug, Clone)]
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    /// Creates a new PostgreSQL payment store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn create(&self, record: &PaymentRecord) -> Result<PaymentInsert, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payments (payment_id, order_id, user_id, total_price, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(record.payment_id.as_uuid())
        .bind(record.order_id.as_uuid())
        .bind(record.user_id.as_uuid())
        .bind(record.total_price.cents())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 1 {
            return Ok(PaymentInsert::Inserted(record.clone()));
        }
        match self.get_by_order(record.order_id).await? {
            Some(existing) => Ok(PaymentInsert::AlreadyExists(existing)),
            None => Err(StoreError::Corrupt(format!(
                "payment for order {} conflicted but is missing",
                record.order_id
            ))),
        }
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<PaymentRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT payment_id, order_id, user_id, total_price, created_at
            FROM payments WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<PaymentRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT payment_id, order_id, user_id, total_price, created_at
            FROM payments WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(row_to_payment).collect()
    }
}
