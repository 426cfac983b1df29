//! Catalogue and stock queries.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::ProductId;
use domain::InventoryRecord;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Deserialize)]
pub struct Pagination {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct InventoryResponse {
    pub product_id: i64,
    pub product_name: String,
    pub price: i64,
    pub quantity: i64,
}

impl From<InventoryRecord> for InventoryResponse {
    fn from(record: InventoryRecord) -> Self {
        Self {
            product_id: record.product_id.as_i64(),
            product_name: record.product_name,
            price: record.price.cents(),
            quantity: record.quantity,
        }
    }
}

/// GET /inventory?offset&limit
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<InventoryResponse>>, ApiError> {
    let offset = page.offset.unwrap_or(0);
    let limit = page.limit.unwrap_or(DEFAULT_LIMIT);
    if offset < 0 || !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "offset must be >= 0 and limit between 1 and {MAX_LIMIT}"
        )));
    }
    let records = state.inventory.products(offset, limit).await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

/// GET /inventory/{product_id}
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<i64>,
) -> Result<Json<InventoryResponse>, ApiError> {
    state
        .inventory
        .product(ProductId::new(product_id))
        .await?
        .map(|record| Json(record.into()))
        .ok_or_else(|| ApiError::NotFound(format!("Product not found: {product_id}")))
}
