//! Order aggregate and its status lifecycle.

mod aggregate;
mod history;
mod state;

pub use aggregate::{CheckoutDetails, Order, OrderLine, OrderRecord};
pub use history::OrderStatusChange;
pub use state::OrderStatus;
