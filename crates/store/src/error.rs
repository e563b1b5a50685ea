use common::{OrderId, ProductId};
use domain::DomainError;
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional stock decrement found too few units.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The order already has a non-terminal payment attempt.
    #[error("Order {0} already has an active payment attempt")]
    ActivePaymentExists(OrderId),

    /// Stored data violates an invariant (e.g. a row referencing a missing product).
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// A stored value could not be mapped back onto the domain model.
    #[error("Corrupt row: {0}")]
    Domain(#[from] DomainError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
