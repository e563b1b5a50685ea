//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::{CheckoutError, GatewayError};
use domain::DomainError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Missing or invalid credentials.
    Unauthorized(String),
    /// Authenticated, but not allowed.
    Forbidden,
    /// Checkout operation error.
    Checkout(CheckoutError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::Internal(msg) => internal(msg),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn internal(msg: String) -> (StatusCode, String) {
    tracing::error!(error = %msg, "internal server error");
    metrics::counter!("api_internal_errors_total").increment(1);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, String) {
    let status = match &err {
        CheckoutError::Validation(_) => StatusCode::BAD_REQUEST,
        CheckoutError::Domain(DomainError::InvalidTransition { .. }) => StatusCode::CONFLICT,
        CheckoutError::Domain(_) => StatusCode::BAD_REQUEST,
        CheckoutError::EmptyCart
        | CheckoutError::InsufficientStock(_)
        | CheckoutError::ProductUnavailable(_)
        | CheckoutError::InvalidState { .. }
        | CheckoutError::PaymentClosed { .. }
        | CheckoutError::ActivePaymentExists(_)
        | CheckoutError::Conflict(_) => StatusCode::CONFLICT,
        CheckoutError::ProductNotFound(_)
        | CheckoutError::CartLineNotFound(_)
        | CheckoutError::OrderNotFound(_)
        | CheckoutError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
        CheckoutError::Forbidden => StatusCode::FORBIDDEN,
        CheckoutError::Gateway(GatewayError::InvalidSignature) => StatusCode::UNAUTHORIZED,
        CheckoutError::Gateway(_) => StatusCode::BAD_GATEWAY,
        CheckoutError::Store(_) => return internal(err.to_string()),
    };
    if status == StatusCode::BAD_GATEWAY {
        tracing::warn!(error = %err, "payment provider failure");
    }
    (status, err.to_string())
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Checkout(CheckoutError::Domain(err))
    }
}
