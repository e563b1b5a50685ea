//! Order status state machine.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// pending ──► payment_pending ──┬──► paid ──► processing ──► shipped ──► delivered
///    ▲               │          ├──► payment_failed ──(retry)──► payment_pending
///    │               │          └──► payment_canceled
///    │               │
/// pending | payment_pending | paid | processing ──► canceled
/// paid | processing | shipped ──► refunded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created from a cart, inventory reserved, no payment started yet.
    #[default]
    Pending,

    /// A payment attempt is open with a provider.
    PaymentPending,

    /// The provider confirmed payment.
    Paid,

    /// The order is being prepared.
    Processing,

    /// The order left the warehouse.
    Shipped,

    /// The order reached the customer (end of the happy path).
    Delivered,

    /// The provider reported a failed payment; a new attempt may be started.
    PaymentFailed,

    /// The payment session was canceled; reserved stock was released.
    PaymentCanceled,

    /// Canceled by the customer or an admin; reserved stock was released.
    Canceled,

    /// Paid amount was returned to the customer.
    Refunded,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Pending,
        OrderStatus::PaymentPending,
        OrderStatus::Paid,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::PaymentFailed,
        OrderStatus::PaymentCanceled,
        OrderStatus::Canceled,
        OrderStatus::Refunded,
    ];

    /// Returns true if a payment attempt may be started in this status.
    pub fn can_initiate_payment(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::PaymentFailed)
    }

    /// Returns true if the owning customer may cancel the order.
    pub fn can_customer_cancel(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::PaymentPending | OrderStatus::Processing
        )
    }

    /// Returns true if provider-reported payment updates may still move the order.
    pub fn accepts_payment_updates(&self) -> bool {
        matches!(self, OrderStatus::PaymentPending)
    }

    /// Returns true if no further automatic (provider-driven) transition is permitted.
    ///
    /// Manual fulfilment steps (`paid` → `processing` → …) still apply to some
    /// of these statuses.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending | OrderStatus::PaymentPending)
    }

    /// Returns true if entering this status gives reserved stock back to the ledger.
    pub fn releases_inventory(&self) -> bool {
        matches!(self, OrderStatus::Canceled | OrderStatus::PaymentCanceled)
    }

    /// Returns true if `next` is an edge of the lifecycle graph from this status.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (*self, next),
            (Pending, PaymentPending)
                | (PaymentFailed, PaymentPending)
                | (PaymentPending, Paid)
                | (PaymentPending, PaymentFailed)
                | (PaymentPending, PaymentCanceled)
                | (Paid, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending | PaymentPending | Paid | Processing, Canceled)
                | (Paid | Processing | Shipped, Refunded)
        )
    }

    /// Validates a transition, returning the new status.
    pub fn transition(self, next: OrderStatus) -> Result<OrderStatus, DomainError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PaymentPending => "payment_pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::PaymentFailed => "payment_failed",
            OrderStatus::PaymentCanceled => "payment_canceled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownValue {
                kind: "order status",
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OrderStatus::default(), Pending);
    }

    #[test]
    fn test_can_initiate_payment() {
        assert!(Pending.can_initiate_payment());
        assert!(PaymentFailed.can_initiate_payment());
        assert!(!PaymentPending.can_initiate_payment());
        assert!(!Paid.can_initiate_payment());
        assert!(!PaymentCanceled.can_initiate_payment());
        assert!(!Canceled.can_initiate_payment());
    }

    #[test]
    fn test_customer_cancel_window() {
        assert!(Pending.can_customer_cancel());
        assert!(PaymentPending.can_customer_cancel());
        assert!(Processing.can_customer_cancel());
        assert!(!Paid.can_customer_cancel());
        assert!(!Shipped.can_customer_cancel());
        assert!(!Canceled.can_customer_cancel());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!Pending.is_terminal());
        assert!(!PaymentPending.is_terminal());
        for status in [
            Paid,
            Processing,
            Shipped,
            Delivered,
            PaymentFailed,
            PaymentCanceled,
            Canceled,
            Refunded,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let status = Pending
            .transition(PaymentPending)
            .and_then(|s| s.transition(Paid))
            .and_then(|s| s.transition(Processing))
            .and_then(|s| s.transition(Shipped))
            .and_then(|s| s.transition(Delivered))
            .unwrap();
        assert_eq!(status, Delivered);
    }

    #[test]
    fn test_retry_after_payment_failure() {
        assert!(PaymentPending.can_transition_to(PaymentFailed));
        assert!(PaymentFailed.can_transition_to(PaymentPending));
        assert!(!PaymentCanceled.can_transition_to(PaymentPending));
    }

    #[test]
    fn test_cancel_and_refund_edges() {
        assert!(Paid.can_transition_to(Canceled));
        assert!(!Shipped.can_transition_to(Canceled));
        assert!(Shipped.can_transition_to(Refunded));
        assert!(!Delivered.can_transition_to(Refunded));
        assert!(!Pending.can_transition_to(Refunded));
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = Delivered.transition(Pending).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: Delivered,
                to: Pending
            }
        );
    }

    #[test]
    fn test_releases_inventory() {
        assert!(Canceled.releases_inventory());
        assert!(PaymentCanceled.releases_inventory());
        assert!(!PaymentFailed.releases_inventory());
        assert!(!Refunded.releases_inventory());
    }

    #[test]
    fn test_string_round_trip() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("archived".parse::<OrderStatus>().is_err());
    }
}
