//! Payment provider adapters.
//!
//! Each provider speaks its own wire format; adapters translate it into the
//! normalized [`PaymentStatus`] so the orchestrator never sees provider data.

pub mod eversend;
pub mod memory;
pub mod paypal;
pub mod signature;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, PaymentId};
use domain::{Currency, Money, PaymentMethod, PaymentStatus, Provider};
use thiserror::Error;

pub use eversend::{EversendConfig, EversendGateway, EversendPayload};
pub use memory::InMemoryGateway;
pub use paypal::{PayPalConfig, PayPalGateway, PayPalPayload};

/// Errors raised by provider adapters.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The HTTP exchange itself failed.
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    /// The provider did not answer within the configured timeout.
    #[error("Payment provider timed out")]
    Timeout,

    /// The provider answered with an error.
    #[error("Payment provider error: {0}")]
    Provider(String),

    /// The webhook signature was missing or did not match.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// The provider's payload could not be decoded.
    #[error("Invalid provider payload: {0}")]
    InvalidPayload(String),

    /// No adapter is configured for the provider.
    #[error("Payment provider {0} is not configured")]
    NotConfigured(Provider),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::InvalidPayload(err.to_string())
        } else {
            GatewayError::Http(err)
        }
    }
}

/// Everything an adapter needs to open a provider session.
#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub method: PaymentMethod,
    pub amount: Money,
    pub currency: Currency,
    /// Where the provider sends the customer after paying.
    pub redirect_url: String,
}

impl InitiateRequest {
    pub fn description(&self) -> String {
        format!("Payment for order {}", self.order_id)
    }
}

/// A session opened with a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSession {
    /// The provider's identifier for the payment.
    pub reference: String,
    /// Where to redirect the customer to complete the payment.
    pub payment_url: Option<String>,
}

/// Provider-specific webhook body, decoded at the adapter boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderPayload {
    Eversend(EversendPayload),
    PayPal(PayPalPayload),
}

/// A verified webhook, reduced to what reconciliation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookUpdate {
    pub provider: Provider,
    pub reference: String,
    /// `None` when the provider reported a status with no normalized mapping.
    pub status: Option<PaymentStatus>,
    pub payload: ProviderPayload,
}

/// A payment provider adapter.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> Provider;

    /// Opens a payment session for the request.
    async fn initiate(&self, request: &InitiateRequest) -> Result<ProviderSession, GatewayError>;

    /// Polls the provider. `None` means the provider reported a status with
    /// no normalized mapping.
    async fn status(&self, reference: &str) -> Result<Option<PaymentStatus>, GatewayError>;

    /// Cancels an open session.
    async fn cancel(&self, reference: &str) -> Result<(), GatewayError>;

    /// Checks the signature over the raw body, then decodes it.
    ///
    /// Returns `Ok(None)` for authentic events that carry no payment update.
    fn verify_webhook(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Option<WebhookUpdate>, GatewayError>;
}

/// The configured adapters, keyed by provider.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<Provider, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under its own provider, replacing any previous one.
    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.provider(), gateway);
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or(GatewayError::NotConfigured(provider))
    }

    /// Payment methods whose provider has an adapter.
    pub fn methods(&self) -> Vec<PaymentMethod> {
        PaymentMethod::ALL
            .into_iter()
            .filter(|m| self.gateways.contains_key(&m.provider()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}
