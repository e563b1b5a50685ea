//! Audit trail of order status changes.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

use super::OrderStatus;

/// One status change of an order. `from` is `None` for the entry written
/// when the order is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusChange {
    pub order_id: OrderId,
    pub from: Option<OrderStatus>,
    pub to: OrderStatus,
    pub notes: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl OrderStatusChange {
    pub fn new(order_id: OrderId, from: Option<OrderStatus>, to: OrderStatus) -> Self {
        Self {
            order_id,
            from,
            to,
            notes: None,
            changed_at: Utc::now(),
        }
    }

    /// Attaches a note; blank notes are dropped.
    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_notes_are_dropped() {
        let change = OrderStatusChange::new(OrderId::new(), None, OrderStatus::Pending)
            .with_notes(Some("   ".to_string()));
        assert_eq!(change.notes, None);

        let change = OrderStatusChange::new(OrderId::new(), None, OrderStatus::Pending)
            .with_notes(Some(" left at door ".to_string()));
        assert_eq!(change.notes.as_deref(), Some("left at door"));
    }
}
