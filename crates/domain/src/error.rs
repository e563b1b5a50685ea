//! Domain error types.

use thiserror::Error;

use crate::order::OrderStatus;

/// Errors raised by domain invariants, independent of storage or transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The requested status change is not an edge of the order lifecycle.
    #[error("Invalid state transition: cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Quantity must be positive.
    #[error("Invalid quantity: {0} (must be greater than 0)")]
    InvalidQuantity(u32),

    /// Price must be positive.
    #[error("Invalid price: {0} (must be greater than 0)")]
    InvalidPrice(i64),

    /// A price times quantity, or a sum of line totals, does not fit in cents.
    #[error("Amount is too large")]
    AmountOverflow,

    /// An order needs at least one line.
    #[error("Order has no lines")]
    NoLines,

    /// A tracking id was given for an order that is not shipped.
    #[error("Tracking id requires a shipped order, not {0}")]
    TrackingRequiresShipment(OrderStatus),

    /// Currency code is not a three-letter ISO code.
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),

    /// A required text field was blank.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// A stored or submitted enum value is not recognized.
    #[error("Unknown {kind}: {value:?}")]
    UnknownValue { kind: &'static str, value: String },
}
