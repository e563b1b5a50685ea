//! Admin endpoints: catalog maintenance, the order listing and manual order
//! transitions.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use checkout::StatusUpdate;
use chrono::Utc;
use common::{OrderId, ProductId, UserId};
use domain::{Money, Order, OrderStatus, Product};
use serde::{Deserialize, Serialize};
use store::{OrderQuery, Store};
use uuid::Uuid;

use super::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertProductRequest {
    pub name: String,
    pub price_cents: i64,
    pub stock: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub tracking_id: Option<String>,
    pub notes: Option<String>,
}

impl From<UpdateStatusRequest> for StatusUpdate {
    fn from(req: UpdateStatusRequest) -> Self {
        StatusUpdate {
            status: req.status,
            tracking_id: req.tracking_id,
            notes: req.notes,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersParams {
    pub status: Option<OrderStatus>,
    pub user_id: Option<Uuid>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// `desc` (default) or `asc` by creation time.
    pub sort: Option<String>,
}

impl ListOrdersParams {
    fn into_query(self) -> Result<OrderQuery, ApiError> {
        let mut query = OrderQuery::new();
        if let Some(status) = self.status {
            query = query.status(status);
        }
        if let Some(user_id) = self.user_id {
            query = query.user_id(UserId::from_uuid(user_id));
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }
        match self.sort.as_deref() {
            None | Some("desc") => {}
            Some("asc") => query = query.oldest_first(),
            Some(other) => {
                return Err(ApiError::BadRequest(format!(
                    "sort must be asc or desc, not {other}"
                )));
            }
        }
        Ok(query)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListResponse {
    pub orders: Vec<Order>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

/// GET /admin/orders: every user's orders, filtered and paged.
#[tracing::instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn list_orders<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<OrderListResponse>, ApiError> {
    user.require_admin()?;

    let query = params.into_query()?;
    let page = state.orchestrator.list_all_orders(&query).await?;
    Ok(Json(OrderListResponse {
        orders: page.orders,
        total: page.total,
        limit: query.page_size(),
        offset: query.skip(),
    }))
}

/// PUT /admin/products/{id}
#[tracing::instrument(skip(state, user, req), fields(user_id = %user.user_id))]
pub async fn upsert_product<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpsertProductRequest>,
) -> Result<Json<Product>, ApiError> {
    user.require_admin()?;

    let mut product = Product::new(
        ProductId::from_uuid(id),
        req.name,
        Money::from_cents(req.price_cents),
        req.stock,
    )?;
    product.active = req.active;
    product.updated_at = Utc::now();

    state.ledger.upsert_product(&product).await?;
    Ok(Json(product))
}

/// PATCH /admin/orders/{id}/status
#[tracing::instrument(skip(state, user, req), fields(user_id = %user.user_id, status = %req.status))]
pub async fn update_order_status<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    user.require_admin()?;

    let order = state
        .orchestrator
        .update_order_status(OrderId::from_uuid(id), req)
        .await?;
    Ok(Json(order))
}
