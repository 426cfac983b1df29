//! Payment queries.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{OrderId, UserId};
use domain::PaymentRecord;
use serde::Serialize;

use super::parse_path;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct PaymentResponse {
    pub payment_id: String,
    pub order_id: String,
    pub user_id: String,
    pub total_price: i64,
    pub created_at: String,
}

impl From<PaymentRecord> for PaymentResponse {
    fn from(record: PaymentRecord) -> Self {
        Self {
            payment_id: record.payment_id.to_string(),
            order_id: record.order_id.to_string(),
            user_id: record.user_id.to_string(),
            total_price: record.total_price.cents(),
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

/// GET /orders/{id}/payment
pub async fn for_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let order_id: OrderId = parse_path(&id, "order id")?;
    state
        .payments
        .payment_for_order(order_id)
        .await?
        .map(|record| Json(record.into()))
        .ok_or_else(|| ApiError::NotFound(format!("No payment for order {order_id}")))
}

/// GET /users/{user_id}/payments: newest first.
pub async fn for_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<PaymentResponse>>, ApiError> {
    let user_id: UserId = parse_path(&user_id, "user id")?;
    let payments = state.payments.payments_for_user(user_id).await?;
    Ok(Json(payments.into_iter().map(Into::into).collect()))
}
