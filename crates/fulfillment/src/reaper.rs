//! Periodic republish of orders stuck in `pending` or `processing`.
//!
//! Covers the window between persisting an order and publishing
//! `order.created`: if the publish failed or the process died in between,
//! the reaper announces the order again. It also picks up `processing`
//! orders whose lock announcement never reached payment capture.
//! Reservation and capture are idempotent per order, so republishing an
//! order that was already handled is harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::order_lifecycle::OrderLifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Time since an unfinished order's last update before it is republished.
    pub threshold: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            threshold: Duration::from_secs(60),
        }
    }
}

/// Sweeps for stale unfinished orders until `shutdown` is cancelled.
///
/// A failed sweep is logged and retried on the next tick.
pub async fn run_reaper(
    lifecycle: Arc<OrderLifecycle>,
    config: ReaperConfig,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        threshold_secs = config.threshold.as_secs(),
        "stale order reaper started"
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match lifecycle.republish_stale(config.threshold).await {
            Ok(0) => tracing::debug!("no stale orders"),
            Ok(count) => tracing::info!(count, "republished stale orders"),
            Err(error) => tracing::warn!(error = %error, "stale order sweep failed"),
        }
    }

    tracing::info!("stale order reaper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::{EventPublisher, InMemoryBroker, topics};
    use chrono::Utc;
    use common::{Money, ProductId, Telemetry, UserId};
    use domain::{Order, OrderItem, OrderStore};
    use storage::{InMemoryOrderCache, InMemoryOrderStore};

    use crate::order_lifecycle::LifecycleConfig;

    #[tokio::test]
    async fn reaper_republishes_stale_orders_and_stops_on_shutdown() {
        let orders = InMemoryOrderStore::new();
        let broker = InMemoryBroker::new();
        let lifecycle = Arc::new(OrderLifecycle::new(
            Arc::new(orders.clone()),
            Arc::new(InMemoryOrderCache::new()),
            EventPublisher::new(Arc::new(broker.clone())),
            LifecycleConfig::default(),
            Telemetry::new("order"),
        ));
        let stale = Order::new_at(
            UserId::new(),
            vec![OrderItem::new(ProductId::new(1001), 1, Money::from_cents(10)).unwrap()],
            Utc::now() - chrono::Duration::minutes(10),
        )
        .unwrap();
        orders.create(&stale).await.unwrap();

        let shutdown = CancellationToken::new();
        let config = ReaperConfig {
            interval: Duration::from_millis(10),
            threshold: Duration::from_secs(60),
        };
        let handle = tokio::spawn(run_reaper(lifecycle, config, shutdown.clone()));

        assert!(
            broker
                .wait_for_published(topics::ORDER_CREATED, 2, Duration::from_secs(2))
                .await
        );
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
