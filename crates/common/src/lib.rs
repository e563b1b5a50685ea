//! Identifiers shared by every crate in the workspace.

mod types;

pub use types::{CartLineId, OrderId, PaymentId, ProductId, UserId};
