//! Checkout error types.

use common::{CartLineId, OrderId, PaymentId, ProductId};
use domain::{DomainError, OrderStatus, PaymentStatus};
use store::StoreError;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors that can occur during checkout operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The request was malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Checkout was attempted with no cart lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// Not enough stock to cover the requested quantity.
    #[error("Insufficient stock for product {0}")]
    InsufficientStock(ProductId),

    /// The product exists but is not for sale.
    #[error("Product {0} is not available")]
    ProductUnavailable(ProductId),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Cart line not found: {0}")]
    CartLineNotFound(CartLineId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    /// The order's status does not allow the requested action.
    #[error("Cannot {action} an order in {status} state")]
    InvalidState {
        status: OrderStatus,
        action: &'static str,
    },

    /// The payment attempt is already finished.
    #[error("Payment {id} is already {status}")]
    PaymentClosed { id: PaymentId, status: PaymentStatus },

    /// The order already has a non-terminal payment attempt.
    #[error("Order {0} already has an active payment")]
    ActivePaymentExists(OrderId),

    /// A concurrent writer changed the order first.
    #[error("Order {0} was modified concurrently")]
    Conflict(OrderId),

    /// The caller does not own the resource.
    #[error("Forbidden")]
    Forbidden,

    /// Payment provider error.
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock { product_id, .. } => {
                CheckoutError::InsufficientStock(product_id)
            }
            StoreError::ProductNotFound(id) => CheckoutError::ProductNotFound(id),
            StoreError::ActivePaymentExists(id) => CheckoutError::ActivePaymentExists(id),
            other => CheckoutError::Store(other),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_keep_their_meaning() {
        let product_id = ProductId::new();
        let err: CheckoutError = StoreError::InsufficientStock {
            product_id,
            requested: 3,
            available: 1,
        }
        .into();
        assert!(matches!(err, CheckoutError::InsufficientStock(id) if id == product_id));

        let err: CheckoutError = StoreError::Integrity("boom".into()).into();
        assert!(matches!(err, CheckoutError::Store(_)));
    }
}
