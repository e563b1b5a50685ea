//! Payment attempts and the normalized payment status vocabulary.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_objects::{Currency, Money};

/// An external payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Eversend,
    #[serde(rename = "paypal")]
    PayPal,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Eversend, Provider::PayPal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Eversend => "eversend",
            Provider::PayPal => "paypal",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::UnknownValue {
                kind: "payment provider",
                value: s.to_string(),
            })
    }
}

/// How the customer chose to pay at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card payment through the Eversend aggregator.
    EversendCard,
    /// Mobile money through the Eversend aggregator.
    EversendMobile,
    #[serde(rename = "paypal")]
    PayPal,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 3] = [
        PaymentMethod::EversendCard,
        PaymentMethod::EversendMobile,
        PaymentMethod::PayPal,
    ];

    /// Returns the provider that settles this method.
    pub fn provider(&self) -> Provider {
        match self {
            PaymentMethod::EversendCard | PaymentMethod::EversendMobile => Provider::Eversend,
            PaymentMethod::PayPal => Provider::PayPal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::EversendCard => "eversend_card",
            PaymentMethod::EversendMobile => "eversend_mobile",
            PaymentMethod::PayPal => "paypal",
        }
    }

    /// Human-readable label for method listings.
    pub fn display_name(&self) -> &'static str {
        match self {
            PaymentMethod::EversendCard => "Card (Eversend)",
            PaymentMethod::EversendMobile => "Mobile money (Eversend)",
            PaymentMethod::PayPal => "PayPal",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| DomainError::UnknownValue {
                kind: "payment method",
                value: s.to_string(),
            })
    }
}

/// Provider-agnostic status of a payment attempt.
///
/// Every adapter maps its native status strings onto these five values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Initiated,
    Processing,
    Completed,
    Failed,
    Canceled,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Initiated,
        PaymentStatus::Processing,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
        PaymentStatus::Canceled,
    ];

    /// Returns true if the attempt can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Canceled
        )
    }

    /// Returns true if moving to `next` makes progress.
    ///
    /// Terminal statuses never move; `initiated` never comes back.
    pub fn can_advance_to(&self, next: PaymentStatus) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        next != PaymentStatus::Initiated
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "initiated",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownValue {
                kind: "payment status",
                value: s.to_string(),
            })
    }
}

/// One provider-side payment session for an order.
///
/// An order may accumulate several attempts across retries, but at most one
/// is non-terminal at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAttempt {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub provider: Provider,
    pub provider_reference: Option<String>,
    pub payment_url: Option<String>,
    pub amount: Money,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentAttempt {
    /// Opens a new attempt in `initiated`, before the provider has been called.
    pub fn open(order_id: OrderId, provider: Provider, amount: Money, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            order_id,
            provider,
            provider_reference: None,
            payment_url: None,
            amount,
            currency,
            status: PaymentStatus::Initiated,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Attaches the provider session created for this attempt.
    pub fn attach_session(&mut self, reference: impl Into<String>, payment_url: Option<String>) {
        self.provider_reference = Some(reference.into());
        self.payment_url = payment_url;
        self.updated_at = Utc::now();
    }

    /// Advances the status. Returns false, leaving the attempt untouched,
    /// when the move would regress or repeat.
    pub fn advance(&mut self, next: PaymentStatus) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    /// Marks the attempt failed with the reason reported by the adapter.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = PaymentStatus::Failed;
        self.error_message = Some(message.into());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt() -> PaymentAttempt {
        PaymentAttempt::open(
            OrderId::new(),
            Provider::Eversend,
            Money::from_cents(5000),
            Currency::parse("UGX").unwrap(),
        )
    }

    #[test]
    fn test_method_provider_mapping() {
        assert_eq!(PaymentMethod::EversendCard.provider(), Provider::Eversend);
        assert_eq!(PaymentMethod::EversendMobile.provider(), Provider::Eversend);
        assert_eq!(PaymentMethod::PayPal.provider(), Provider::PayPal);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&PaymentMethod::PayPal).unwrap(),
            "\"paypal\""
        );
        assert_eq!(
            serde_json::to_string(&PaymentMethod::EversendMobile).unwrap(),
            "\"eversend_mobile\""
        );
        assert_eq!(serde_json::to_string(&Provider::PayPal).unwrap(), "\"paypal\"");
        assert_eq!("PayPal".parse::<Provider>().unwrap(), Provider::PayPal);
        assert!("stripe".parse::<Provider>().is_err());
    }

    #[test]
    fn test_terminal_statuses_never_advance() {
        for terminal in [
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Canceled,
        ] {
            for next in PaymentStatus::ALL {
                assert!(!terminal.can_advance_to(next));
            }
        }
        assert!(PaymentStatus::Initiated.can_advance_to(PaymentStatus::Processing));
        assert!(PaymentStatus::Processing.can_advance_to(PaymentStatus::Completed));
        assert!(!PaymentStatus::Processing.can_advance_to(PaymentStatus::Initiated));
        assert!(!PaymentStatus::Processing.can_advance_to(PaymentStatus::Processing));
    }

    #[test]
    fn test_attempt_lifecycle() {
        let mut attempt = attempt();
        assert!(attempt.is_active());

        attempt.attach_session("ev_123", Some("https://pay.example/ev_123".into()));
        assert_eq!(attempt.provider_reference.as_deref(), Some("ev_123"));

        assert!(attempt.advance(PaymentStatus::Processing));
        assert!(attempt.advance(PaymentStatus::Completed));
        assert!(!attempt.advance(PaymentStatus::Failed));
        assert_eq!(attempt.status, PaymentStatus::Completed);
        assert!(!attempt.is_active());
    }

    #[test]
    fn test_fail_records_message() {
        let mut attempt = attempt();
        attempt.fail("provider timed out");
        assert_eq!(attempt.status, PaymentStatus::Failed);
        assert_eq!(attempt.error_message.as_deref(), Some("provider timed out"));
    }
}
