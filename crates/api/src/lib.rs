//! HTTP API server and service wiring for the order fulfillment choreography.
//!
//! Provides REST endpoints for orders, inventory and payments, with
//! structured logging (tracing) and Prometheus metrics. The three
//! choreography participants run in-process as broker consumers.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AppState, ServiceInfo, StoreBackend, Stores, Workers, spawn_workers};

/// Name reported by the health endpoint and attached to every metric.
pub const SERVICE_NAME: &str = "order-fulfillment";

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/status", put(routes::orders::update_status))
        .route("/orders/{id}/payment", get(routes::payments::for_order))
        .route("/users/{user_id}/payments", get(routes::payments::for_user))
        .route("/inventory", get(routes::inventory::list))
        .route("/inventory/{product_id}", get(routes::inventory::get))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
