//! Cart endpoints. Every route acts on the caller's own cart.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CartLineId, ProductId};
use domain::CartView;
use serde::{Deserialize, Serialize};
use store::Store;
use uuid::Uuid;

use super::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: Uuid,
    /// Signed change; a non-positive result removes the line.
    pub quantity: i32,
}

#[derive(Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct CountResponse {
    pub count: u64,
}

/// GET /cart
#[tracing::instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn get<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
) -> Result<Json<CartView>, ApiError> {
    Ok(Json(state.cart.view(user.user_id).await?))
}

/// POST /cart/items
#[tracing::instrument(skip(state, user, req), fields(user_id = %user.user_id))]
pub async fn add_item<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<CartView>, ApiError> {
    state
        .cart
        .add_or_update(user.user_id, ProductId::from_uuid(req.product_id), req.quantity)
        .await?;
    Ok(Json(state.cart.view(user.user_id).await?))
}

/// PUT /cart/items/{id}
#[tracing::instrument(skip(state, user, req), fields(user_id = %user.user_id))]
pub async fn set_quantity<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SetQuantityRequest>,
) -> Result<Json<CartView>, ApiError> {
    state
        .cart
        .set_quantity(user.user_id, CartLineId::from_uuid(id), req.quantity)
        .await?;
    Ok(Json(state.cart.view(user.user_id).await?))
}

/// DELETE /cart/items/{id}
#[tracing::instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn remove_item<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .cart
        .remove_line(user.user_id, CartLineId::from_uuid(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /cart
pub async fn clear<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
) -> Result<StatusCode, ApiError> {
    state.cart.clear(user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /cart/count
pub async fn count<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.cart.item_count(user.user_id).await?;
    Ok(Json(CountResponse { count }))
}
