//! Eversend card and mobile money adapter.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use domain::{PaymentMethod, PaymentStatus, Provider};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::{
    GatewayError, InitiateRequest, PaymentGateway, ProviderPayload, ProviderSession,
    WebhookUpdate, signature,
};

/// The only webhook event that carries a payment status.
const PAYMENT_UPDATE_EVENT: &str = "payment.update";

/// Connection settings for Eversend.
#[derive(Debug, Clone)]
pub struct EversendConfig {
    pub api_key: String,
    pub base_url: String,
    pub webhook_secret: String,
    /// Where Eversend posts webhooks for payments we create.
    pub callback_url: Option<String>,
    pub timeout: Duration,
}

/// Maps an Eversend status onto the normalized vocabulary.
pub fn map_status(status: &str) -> Option<PaymentStatus> {
    match status {
        "pending" => Some(PaymentStatus::Processing),
        "successful" => Some(PaymentStatus::Completed),
        "failed" => Some(PaymentStatus::Failed),
        "canceled" | "cancelled" => Some(PaymentStatus::Canceled),
        _ => None,
    }
}

/// Eversend webhook body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EversendPayload {
    pub event_type: String,
    pub data: EversendPaymentData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EversendPaymentData {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Decodes an already-authenticated webhook body.
pub(crate) fn decode_webhook(body: &[u8]) -> Result<Option<WebhookUpdate>, GatewayError> {
    let payload: EversendPayload =
        serde_json::from_slice(body).map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
    if payload.event_type != PAYMENT_UPDATE_EVENT {
        return Ok(None);
    }
    Ok(Some(WebhookUpdate {
        provider: Provider::Eversend,
        reference: payload.data.id.clone(),
        status: map_status(&payload.data.status),
        payload: ProviderPayload::Eversend(payload),
    }))
}

#[derive(Serialize)]
struct CreatePaymentBody<'a> {
    amount: String,
    currency: &'a str,
    description: String,
    payment_type: &'static str,
    metadata: HashMap<&'static str, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    redirect_url: &'a str,
}

#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize)]
struct PaymentData {
    id: String,
    #[serde(default)]
    payment_url: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// HTTP adapter for the Eversend payments API.
pub struct EversendGateway {
    client: reqwest::Client,
    config: EversendConfig,
}

impl EversendGateway {
    pub fn new(config: EversendConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(GatewayError::Http)?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn read<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Envelope<T>, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider(format!(
                "Eversend returned {status}: {body}"
            )));
        }
        let envelope: Envelope<T> = response.json().await?;
        if !envelope.success {
            return Err(GatewayError::Provider(
                envelope
                    .message
                    .unwrap_or_else(|| "Eversend reported failure".to_string()),
            ));
        }
        Ok(envelope)
    }
}

#[async_trait]
impl PaymentGateway for EversendGateway {
    fn provider(&self) -> Provider {
        Provider::Eversend
    }

    #[tracing::instrument(skip(self, request), fields(payment_id = %request.payment_id))]
    async fn initiate(&self, request: &InitiateRequest) -> Result<ProviderSession, GatewayError> {
        let payment_type = match request.method {
            PaymentMethod::EversendMobile => "mobile_money",
            _ => "card",
        };
        let body = CreatePaymentBody {
            amount: request.amount.to_decimal_string(),
            currency: request.currency.as_str(),
            description: request.description(),
            payment_type,
            metadata: HashMap::from([
                ("payment_id", request.payment_id.to_string()),
                ("order_id", request.order_id.to_string()),
            ]),
            callback_url: self.config.callback_url.as_deref(),
            redirect_url: &request.redirect_url,
        };

        let response = self
            .client
            .post(self.url("/payments"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let data: PaymentData = Self::read(response)
            .await?
            .data
            .ok_or_else(|| GatewayError::InvalidPayload("missing payment data".to_string()))?;

        Ok(ProviderSession {
            reference: data.id,
            payment_url: data.payment_url.filter(|url| !url.is_empty()),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn status(&self, reference: &str) -> Result<Option<PaymentStatus>, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("/payments/{reference}")))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;
        let data: PaymentData = Self::read(response)
            .await?
            .data
            .ok_or_else(|| GatewayError::InvalidPayload("missing payment data".to_string()))?;
        Ok(data.status.as_deref().and_then(map_status))
    }

    #[tracing::instrument(skip(self))]
    async fn cancel(&self, reference: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(self.url(&format!("/payments/{reference}/cancel")))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;
        Self::read::<serde_json::Value>(response).await?;
        Ok(())
    }

    fn verify_webhook(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Option<WebhookUpdate>, GatewayError> {
        signature::verify(&self.config.webhook_secret, signature, body)?;
        decode_webhook(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, PaymentId};
    use domain::{Currency, Money};
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer, timeout: Duration) -> EversendGateway {
        EversendGateway::new(EversendConfig {
            api_key: "ev_key".into(),
            base_url: server.uri(),
            webhook_secret: "ev_secret".into(),
            callback_url: Some("https://shop.example/payments/webhook".into()),
            timeout,
        })
        .unwrap()
    }

    fn request() -> InitiateRequest {
        InitiateRequest {
            payment_id: PaymentId::new(),
            order_id: OrderId::new(),
            method: PaymentMethod::EversendMobile,
            amount: Money::from_cents(150_000),
            currency: Currency::parse("UGX").unwrap(),
            redirect_url: "https://shop.example/return".into(),
        }
    }

    #[test]
    fn status_table() {
        assert_eq!(map_status("pending"), Some(PaymentStatus::Processing));
        assert_eq!(map_status("successful"), Some(PaymentStatus::Completed));
        assert_eq!(map_status("failed"), Some(PaymentStatus::Failed));
        assert_eq!(map_status("cancelled"), Some(PaymentStatus::Canceled));
        assert_eq!(map_status("canceled"), Some(PaymentStatus::Canceled));
        assert_eq!(map_status("reversed"), None);
    }

    #[tokio::test]
    async fn initiate_posts_payment_and_reads_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments"))
            .and(bearer_token("ev_key"))
            .and(body_partial_json(serde_json::json!({
                "amount": "1500.00",
                "currency": "UGX",
                "payment_type": "mobile_money",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "success": true,
                "data": {"id": "ev_pay_1", "payment_url": "https://pay.eversend.example/ev_pay_1", "status": "pending"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = gateway(&server, Duration::from_secs(5))
            .initiate(&request())
            .await
            .unwrap();
        assert_eq!(session.reference, "ev_pay_1");
        assert_eq!(
            session.payment_url.as_deref(),
            Some("https://pay.eversend.example/ev_pay_1")
        );
    }

    #[tokio::test]
    async fn initiate_surfaces_provider_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid currency"))
            .mount(&server)
            .await;

        let err = gateway(&server, Duration::from_secs(5))
            .initiate(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Provider(msg) if msg.contains("invalid currency")));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(serde_json::json!({"success": true, "data": {"id": "late"}})),
            )
            .mount(&server)
            .await;

        let err = gateway(&server, Duration::from_millis(50))
            .initiate(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout));
    }

    #[tokio::test]
    async fn status_maps_provider_value() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payments/ev_pay_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": {"id": "ev_pay_1", "status": "successful"}
            })))
            .mount(&server)
            .await;

        let status = gateway(&server, Duration::from_secs(5))
            .status("ev_pay_1")
            .await
            .unwrap();
        assert_eq!(status, Some(PaymentStatus::Completed));
    }

    #[tokio::test]
    async fn webhook_requires_valid_signature() {
        let server = MockServer::start().await;
        let gateway = gateway(&server, Duration::from_secs(5));
        let body = serde_json::to_vec(&serde_json::json!({
            "event_type": "payment.update",
            "data": {"id": "ev_pay_1", "status": "failed", "metadata": {"payment_id": "p"}}
        }))
        .unwrap();

        assert!(matches!(
            gateway.verify_webhook(None, &body),
            Err(GatewayError::InvalidSignature)
        ));

        let sig = signature::sign("ev_secret", &body).unwrap();
        let update = gateway.verify_webhook(Some(&sig), &body).unwrap().unwrap();
        assert_eq!(update.reference, "ev_pay_1");
        assert_eq!(update.status, Some(PaymentStatus::Failed));
        assert!(matches!(update.payload, ProviderPayload::Eversend(_)));
    }

    #[test]
    fn other_events_are_ignored() {
        let body = br#"{"event_type":"payout.update","data":{"id":"x","status":"successful"}}"#;
        assert_eq!(decode_webhook(body).unwrap(), None);
        assert!(matches!(
            decode_webhook(b"not json"),
            Err(GatewayError::InvalidPayload(_))
        ));
    }
}
