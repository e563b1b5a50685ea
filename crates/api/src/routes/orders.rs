//! Order checkout, query and cancel endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::{CheckoutDetails, Order, OrderStatusChange, PaymentAttempt, PaymentMethod};
use serde::{Deserialize, Serialize};
use store::Store;
use uuid::Uuid;

use super::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub shipping_address: String,
    pub billing_address: Option<String>,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetailResponse {
    #[serde(flatten)]
    pub order: Order,
    pub payments: Vec<PaymentAttempt>,
}

// -- Handlers --

/// POST /orders: check out the caller's cart.
#[tracing::instrument(skip(state, user, req), fields(user_id = %user.user_id))]
pub async fn create<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let details = CheckoutDetails {
        shipping_address: req.shipping_address,
        billing_address: req.billing_address,
        payment_method: req.payment_method,
        notes: req.notes,
    };
    let order = state.orchestrator.create_order(user.user_id, details).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders: the caller's orders, newest first.
pub async fn list<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.orchestrator.list_orders(user.user_id).await?))
}

/// GET /orders/{id}/history: the order's status changes, oldest first.
pub async fn history<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OrderStatusChange>>, ApiError> {
    let changes = state
        .orchestrator
        .order_history(user.actor(), OrderId::from_uuid(id))
        .await?;
    Ok(Json(changes))
}

/// GET /orders/{id}: an order with its payment attempts.
#[tracing::instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn get<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDetailResponse>, ApiError> {
    let order_id = OrderId::from_uuid(id);
    let order = state.orchestrator.get_order(user.actor(), order_id).await?;
    let payments = state
        .orchestrator
        .order_payments(user.actor(), order_id)
        .await?;
    Ok(Json(OrderDetailResponse { order, payments }))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn cancel<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .orchestrator
        .cancel_order(user.user_id, OrderId::from_uuid(id))
        .await?;
    Ok(Json(order))
}
