//! Store selection and component wiring shared by the binary and the tests.

use std::sync::Arc;

use broker::{
    Broker, Consumer, ConsumerConfig, ConsumerError, ConsumerReport, EventPublisher, MessageHandler,
};
use common::Telemetry;
use domain::{InventoryStore, OrderCache, OrderStore, PaymentStore, StoreError};
use fulfillment::{
    InventoryReservation, LifecycleConfig, OrderLifecycle, PaymentCapture, ReaperConfig,
    run_reaper,
};
use storage::{
    InMemoryInventoryStore, InMemoryOrderCache, InMemoryOrderStore, InMemoryPaymentStore,
    PgInventoryStore, PgOrderStore, PgPaymentStore, default_catalogue, seed_if_empty,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Where orders, stock and payments are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

/// The store each component persists to.
#[derive(Clone)]
pub struct Stores {
    pub backend: StoreBackend,
    pub orders: Arc<dyn OrderStore>,
    pub inventory: Arc<dyn InventoryStore>,
    pub payments: Arc<dyn PaymentStore>,
    pub cache: Arc<dyn OrderCache>,
}

impl Stores {
    /// In-memory stores with an empty catalogue.
    pub fn in_memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            orders: Arc::new(InMemoryOrderStore::new()),
            inventory: Arc::new(InMemoryInventoryStore::new()),
            payments: Arc::new(InMemoryPaymentStore::new()),
            cache: Arc::new(InMemoryOrderCache::new()),
        }
    }

    /// Postgres stores sharing one pool. The cache stays in memory.
    pub fn postgres(pool: storage::PgPool) -> Self {
        Self {
            backend: StoreBackend::Postgres,
            orders: Arc::new(PgOrderStore::new(pool.clone())),
            inventory: Arc::new(PgInventoryStore::new(pool.clone())),
            payments: Arc::new(PgPaymentStore::new(pool)),
            cache: Arc::new(InMemoryOrderCache::new()),
        }
    }

    /// Opens the stores named by the configuration, running migrations and
    /// seeding the default catalogue into an empty inventory.
    pub async fn from_config(config: &Config) -> Result<Self, StoreError> {
        let stores = match &config.database_url {
            Some(url) => {
                let pool = storage::connect(url, config.database_max_connections).await?;
                storage::run_migrations(&pool).await?;
                tracing::info!("using postgres stores");
                Self::postgres(pool)
            }
            None => {
                tracing::info!("DATABASE_URL not set, using in-memory stores");
                Self::in_memory()
            }
        };
        seed_if_empty(stores.inventory.as_ref(), &default_catalogue()).await?;
        Ok(stores)
    }
}

/// Deployment facts reported by the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub store: StoreBackend,
    pub exchange: String,
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub lifecycle: Arc<OrderLifecycle>,
    pub inventory: Arc<InventoryReservation>,
    pub payments: Arc<PaymentCapture>,
    pub info: ServiceInfo,
}

impl AppState {
    /// Builds the three components on top of `stores`, publishing through `broker`.
    pub fn new(stores: Stores, broker: Arc<dyn Broker>, config: &Config) -> Self {
        let publisher = EventPublisher::new(broker).with_timeout(config.publish_timeout);
        let info = ServiceInfo {
            store: stores.backend,
            exchange: config.broker_exchange.clone(),
        };
        Self::with_publisher(stores, publisher, config.lifecycle_config(), info)
    }

    pub fn with_publisher(
        stores: Stores,
        publisher: EventPublisher,
        lifecycle_config: LifecycleConfig,
        info: ServiceInfo,
    ) -> Self {
        Self {
            info,
            lifecycle: Arc::new(OrderLifecycle::new(
                stores.orders,
                stores.cache,
                publisher.clone(),
                lifecycle_config,
                Telemetry::new("order"),
            )),
            inventory: Arc::new(InventoryReservation::new(
                stores.inventory,
                publisher.clone(),
                Telemetry::new("inventory"),
            )),
            payments: Arc::new(PaymentCapture::new(
                stores.payments,
                publisher,
                Telemetry::new("payment"),
            )),
        }
    }
}

/// Background tasks started next to the HTTP server.
pub struct Workers {
    pub consumers: Vec<(&'static str, JoinHandle<Result<ConsumerReport, ConsumerError>>)>,
    pub reaper: JoinHandle<()>,
}

/// Spawns one consumer per component and the stale order reaper.
///
/// A consumer that stops with an error cancels `shutdown`, taking the rest
/// of the process down with it.
pub fn spawn_workers(
    state: &AppState,
    broker: Arc<dyn Broker>,
    consumer_config: ConsumerConfig,
    reaper_config: ReaperConfig,
    shutdown: CancellationToken,
) -> Workers {
    let consumers = vec![
        spawn_consumer(
            state.lifecycle.clone(),
            broker.clone(),
            consumer_config.clone(),
            Telemetry::new("order"),
            shutdown.clone(),
        ),
        spawn_consumer(
            state.inventory.clone(),
            broker.clone(),
            consumer_config.clone(),
            Telemetry::new("inventory"),
            shutdown.clone(),
        ),
        spawn_consumer(
            state.payments.clone(),
            broker,
            consumer_config,
            Telemetry::new("payment"),
            shutdown.clone(),
        ),
    ];
    let reaper = tokio::spawn(run_reaper(state.lifecycle.clone(), reaper_config, shutdown));
    Workers { consumers, reaper }
}

fn spawn_consumer<H: MessageHandler>(
    handler: Arc<H>,
    broker: Arc<dyn Broker>,
    config: ConsumerConfig,
    telemetry: Telemetry,
    shutdown: CancellationToken,
) -> (&'static str, JoinHandle<Result<ConsumerReport, ConsumerError>>) {
    let name = handler.name();
    let consumer = Consumer::new(handler, broker, config, telemetry);
    let handle = tokio::spawn(async move {
        let result = consumer.run(shutdown.clone()).await;
        if result.is_err() {
            shutdown.cancel();
        }
        result
    });
    (name, handle)
}
