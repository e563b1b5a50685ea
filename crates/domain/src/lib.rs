//! Domain model for the storefront checkout.
//!
//! This crate holds the types every other layer agrees on:
//! - `Product` and `CartLine` for the catalog and the pre-checkout cart
//! - `Order` with its `OrderStatus` state machine and status history
//! - `PaymentAttempt` with the provider-agnostic `PaymentStatus`
//! - `Money` and `Currency` value objects

pub mod cart;
pub mod error;
pub mod order;
pub mod payment;
pub mod product;
pub mod value_objects;

pub use cart::{CartLine, CartView};
pub use error::DomainError;
pub use order::{CheckoutDetails, Order, OrderLine, OrderRecord, OrderStatus, OrderStatusChange};
pub use payment::{PaymentAttempt, PaymentMethod, PaymentStatus, Provider};
pub use product::Product;
pub use value_objects::{Currency, Money};
