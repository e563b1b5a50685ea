//! Scriptable in-memory gateway for tests and local runs.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::{PaymentStatus, Provider};

use super::{
    GatewayError, InitiateRequest, PaymentGateway, ProviderSession, WebhookUpdate, eversend,
    paypal, signature,
};

/// Webhook secret used by [`InMemoryGateway::new`].
pub const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    sessions: HashMap<String, PaymentStatus>,
    next_id: u32,
    fail_on_initiate: bool,
    fail_on_status: bool,
    fail_on_cancel: bool,
    delay: Option<Duration>,
    initiate_calls: usize,
    status_calls: usize,
    cancel_calls: usize,
}

/// In-memory gateway. Decodes webhooks in the wire format of the provider it
/// stands in for.
#[derive(Debug, Clone)]
pub struct InMemoryGateway {
    provider: Provider,
    webhook_secret: String,
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryGateway {
    /// Creates a gateway standing in for `provider`, signing webhooks with
    /// [`TEST_WEBHOOK_SECRET`].
    pub fn new(provider: Provider) -> Self {
        Self::with_secret(provider, TEST_WEBHOOK_SECRET)
    }

    pub fn with_secret(provider: Provider, webhook_secret: impl Into<String>) -> Self {
        Self {
            provider,
            webhook_secret: webhook_secret.into(),
            state: Arc::default(),
        }
    }

    /// Configures the gateway to fail on initiate calls.
    pub fn set_fail_on_initiate(&self, fail: bool) {
        self.state.write().unwrap().fail_on_initiate = fail;
    }

    /// Configures the gateway to fail on status polls.
    pub fn set_fail_on_status(&self, fail: bool) {
        self.state.write().unwrap().fail_on_status = fail;
    }

    /// Configures the gateway to fail on cancel calls.
    pub fn set_fail_on_cancel(&self, fail: bool) {
        self.state.write().unwrap().fail_on_cancel = fail;
    }

    /// Delays every initiate call, e.g. to trip a caller's timeout.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.write().unwrap().delay = delay;
    }

    /// Sets the status the provider will report for a session.
    pub fn set_status(&self, reference: &str, status: PaymentStatus) {
        self.state
            .write()
            .unwrap()
            .sessions
            .insert(reference.to_string(), status);
    }

    /// Returns the status the provider holds for a session.
    pub fn session_status(&self, reference: &str) -> Option<PaymentStatus> {
        self.state.read().unwrap().sessions.get(reference).copied()
    }

    pub fn initiate_calls(&self) -> usize {
        self.state.read().unwrap().initiate_calls
    }

    pub fn status_calls(&self) -> usize {
        self.state.read().unwrap().status_calls
    }

    pub fn cancel_calls(&self) -> usize {
        self.state.read().unwrap().cancel_calls
    }

    /// Signs a webhook body the way this gateway expects.
    pub fn sign(&self, body: &[u8]) -> String {
        signature::sign(&self.webhook_secret, body).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<ProviderSession, GatewayError> {
        let delay = {
            let mut state = self.state.write().unwrap();
            state.initiate_calls += 1;
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().unwrap();
        if state.fail_on_initiate {
            return Err(GatewayError::Provider("Payment declined".to_string()));
        }

        state.next_id += 1;
        let reference = format!("{}-{:04}", self.provider.as_str().to_uppercase(), state.next_id);
        state
            .sessions
            .insert(reference.clone(), PaymentStatus::Initiated);

        Ok(ProviderSession {
            payment_url: Some(format!(
                "https://{}.test/pay/{reference}?amount={}&return={}",
                self.provider, request.amount, request.redirect_url
            )),
            reference,
        })
    }

    async fn status(&self, reference: &str) -> Result<Option<PaymentStatus>, GatewayError> {
        let mut state = self.state.write().unwrap();
        state.status_calls += 1;
        if state.fail_on_status {
            return Err(GatewayError::Provider("status unavailable".to_string()));
        }
        state
            .sessions
            .get(reference)
            .copied()
            .map(Some)
            .ok_or_else(|| GatewayError::Provider(format!("unknown payment {reference}")))
    }

    async fn cancel(&self, reference: &str) -> Result<(), GatewayError> {
        let mut state = self.state.write().unwrap();
        state.cancel_calls += 1;
        if state.fail_on_cancel {
            return Err(GatewayError::Provider("cancel rejected".to_string()));
        }
        match state.sessions.get_mut(reference) {
            Some(status) if !status.is_terminal() => {
                *status = PaymentStatus::Canceled;
                Ok(())
            }
            Some(status) => Err(GatewayError::Provider(format!(
                "payment {reference} is already {status}"
            ))),
            None => Err(GatewayError::Provider(format!("unknown payment {reference}"))),
        }
    }

    fn verify_webhook(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Option<WebhookUpdate>, GatewayError> {
        signature::verify(&self.webhook_secret, signature, body)?;
        match self.provider {
            Provider::Eversend => eversend::decode_webhook(body),
            Provider::PayPal => paypal::decode_webhook(body),
        }
    }
}
