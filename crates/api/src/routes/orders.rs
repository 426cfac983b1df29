//! Order creation, lookup and operator status updates.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{Money, OrderId, ProductId, UserId};
use domain::{Order, OrderItem, OrderStatus};
use fulfillment::FulfillmentError;
use serde::{Deserialize, Serialize};

use super::parse_path;
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: i64,
    pub quantity: i64,
    /// Unit price in minor units.
    pub price: i64,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub total_price: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: i64,
    pub quantity: i64,
    pub price: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            user_id: order.user_id.to_string(),
            status: order.status.to_string(),
            items: order
                .items
                .iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.as_i64(),
                    quantity: item.quantity,
                    price: item.price.cents(),
                })
                .collect(),
            total_price: order.total_price.cents(),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /orders: create a `pending` order and announce it.
///
/// Answers 202 instead of 201 when the order was stored but `order.created`
/// could not be published yet.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let user_id: UserId = parse_path(&req.user_id, "user_id")?;
    let items = req
        .items
        .into_iter()
        .map(|item| OrderItem {
            product_id: ProductId::new(item.product_id),
            quantity: item.quantity,
            price: Money::from_cents(item.price),
        })
        .collect();

    match state.lifecycle.create_order(user_id, items).await {
        Ok(order) => Ok((StatusCode::CREATED, Json(order.into()))),
        Err(FulfillmentError::Publish { order, .. }) => {
            Ok((StatusCode::ACCEPTED, Json((*order).into())))
        }
        Err(err) => Err(err.into()),
    }
}

/// GET /orders/{id}: cache-first order lookup.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_path(&id, "order id")?;
    let order = state.lifecycle.get_order(order_id).await?;
    Ok(Json(order.into()))
}

/// PUT /orders/{id}/status: operator-initiated transition.
#[tracing::instrument(skip(state, req))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_path(&id, "order id")?;
    let status: OrderStatus = req
        .status
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid status: {e}")))?;
    let order = state.lifecycle.update_status(order_id, status).await?;
    Ok(Json(order.into()))
}
