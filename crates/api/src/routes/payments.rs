//! Payment endpoints and the provider webhook.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use checkout::{ReconcileOutcome, WebhookOutcome};
use common::{OrderId, PaymentId};
use domain::{Currency, PaymentAttempt, PaymentMethod, PaymentStatus, Provider};
use serde::{Deserialize, Serialize};
use store::Store;
use uuid::Uuid;

use super::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

pub const PROVIDER_HEADER: &str = "x-payment-provider";
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    pub order_id: Uuid,
    pub currency: String,
    pub redirect_url: String,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodResponse {
    pub method: PaymentMethod,
    pub provider: Provider,
    pub name: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentResponse {
    pub payment_id: PaymentId,
    pub payment_url: Option<String>,
    pub status: PaymentStatus,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

// -- Handlers --

/// GET /payments/methods: methods whose provider is configured.
pub async fn methods<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<Vec<PaymentMethodResponse>> {
    let methods = state
        .orchestrator
        .payment_methods()
        .into_iter()
        .map(|method| PaymentMethodResponse {
            method,
            provider: method.provider(),
            name: method.display_name(),
        })
        .collect();
    Json(methods)
}

/// POST /payments/initiate
#[tracing::instrument(skip(state, user, req), fields(user_id = %user.user_id, order_id = %req.order_id))]
pub async fn initiate<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Json(req): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<InitiatePaymentResponse>), ApiError> {
    let currency = Currency::parse(&req.currency)?;
    let attempt = state
        .orchestrator
        .initiate_payment(
            user.user_id,
            OrderId::from_uuid(req.order_id),
            currency,
            req.redirect_url,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitiatePaymentResponse {
            payment_id: attempt.id,
            payment_url: attempt.payment_url,
            status: attempt.status,
        }),
    ))
}

/// GET /payments/{id}: current status, polling the provider while open.
#[tracing::instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn get<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentAttempt>, ApiError> {
    let attempt = state
        .orchestrator
        .get_payment(user.actor(), PaymentId::from_uuid(id))
        .await?;
    Ok(Json(attempt))
}

/// POST /payments/{id}/cancel
#[tracing::instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn cancel<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentAttempt>, ApiError> {
    let attempt = state
        .orchestrator
        .cancel_payment(user.user_id, PaymentId::from_uuid(id))
        .await?;
    Ok(Json(attempt))
}

/// POST /payments/webhook: provider callback, authenticated by signature.
///
/// Applied, no-op and ignored events all answer 200 so providers stop
/// retrying; only infrastructure failures answer 5xx.
#[tracing::instrument(skip_all)]
pub async fn webhook<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let outcome = state
        .orchestrator
        .reconciler()
        .handle_webhook(header(PROVIDER_HEADER), header(SIGNATURE_HEADER), &body)
        .await?;

    let status = match outcome {
        WebhookOutcome::Processed(ReconcileOutcome::Applied(_)) => "applied",
        WebhookOutcome::Processed(ReconcileOutcome::NoOp) => "noop",
        WebhookOutcome::Ignored => "ignored",
    };
    Ok(Json(WebhookResponse { status }))
}
