//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::{AppState, StoreBackend};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub store: StoreBackend,
    pub exchange: String,
}

/// GET /health: reports liveness along with the store backend and exchange
/// this instance runs against.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: crate::SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        store: state.info.store,
        exchange: state.info.exchange.clone(),
    })
}
