//! PayPal redirect checkout adapter (Orders v2 API).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use domain::{PaymentStatus, Provider};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::json;
use tokio::sync::Mutex;

use super::{
    GatewayError, InitiateRequest, PaymentGateway, ProviderPayload, ProviderSession,
    WebhookUpdate, signature,
};

const HANDLED_EVENTS: [&str; 5] = [
    "PAYMENT.AUTHORIZATION.CREATED",
    "PAYMENT.CAPTURE.COMPLETED",
    "PAYMENT.CAPTURE.DENIED",
    "CHECKOUT.ORDER.APPROVED",
    "CHECKOUT.ORDER.COMPLETED",
];

const CAPTURE_DENIED_EVENT: &str = "PAYMENT.CAPTURE.DENIED";

/// Tokens are refreshed this long before PayPal says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Connection settings for PayPal.
#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub secret: String,
    pub base_url: String,
    pub webhook_secret: String,
    pub timeout: Duration,
}

/// Maps a PayPal order status onto the normalized vocabulary.
pub fn map_status(status: &str) -> Option<PaymentStatus> {
    match status {
        "CREATED" | "SAVED" => Some(PaymentStatus::Initiated),
        "APPROVED" => Some(PaymentStatus::Processing),
        "COMPLETED" => Some(PaymentStatus::Completed),
        "VOIDED" => Some(PaymentStatus::Canceled),
        _ => None,
    }
}

/// PayPal webhook body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PayPalPayload {
    pub event_type: String,
    pub resource: PayPalResource,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PayPalResource {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    /// Our payment attempt id, echoed back by PayPal.
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub purchase_units: Vec<PayPalPurchaseUnit>,
    #[serde(default)]
    pub supplementary_data: Option<PayPalSupplementaryData>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PayPalPurchaseUnit {
    #[serde(default)]
    pub reference_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PayPalSupplementaryData {
    pub related_ids: PayPalRelatedIds,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PayPalRelatedIds {
    #[serde(default)]
    pub order_id: Option<String>,
}

impl PayPalPayload {
    /// The checkout order id. Capture events carry it in the related ids.
    fn order_reference(&self) -> &str {
        self.resource
            .supplementary_data
            .as_ref()
            .and_then(|data| data.related_ids.order_id.as_deref())
            .unwrap_or(&self.resource.id)
    }

    fn normalized_status(&self) -> Option<PaymentStatus> {
        if self.event_type == CAPTURE_DENIED_EVENT {
            return Some(PaymentStatus::Failed);
        }
        self.resource.status.as_deref().and_then(map_status)
    }
}

/// Decodes an already-authenticated webhook body.
pub(crate) fn decode_webhook(body: &[u8]) -> Result<Option<WebhookUpdate>, GatewayError> {
    let payload: PayPalPayload =
        serde_json::from_slice(body).map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
    if !HANDLED_EVENTS.contains(&payload.event_type.as_str()) {
        return Ok(None);
    }
    Ok(Some(WebhookUpdate {
        provider: Provider::PayPal,
        reference: payload.order_reference().to_string(),
        status: payload.normalized_status(),
        payload: ProviderPayload::PayPal(payload),
    }))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Deserialize)]
struct Link {
    href: String,
    rel: String,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// HTTP adapter for PayPal checkout orders.
pub struct PayPalGateway {
    client: reqwest::Client,
    config: PayPalConfig,
    token: Mutex<Option<CachedToken>>,
}

impl PayPalGateway {
    pub fn new(config: PayPalConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(GatewayError::Http)?;
        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider(format!(
                "PayPal returned {status}: {body}"
            )));
        }
        Ok(response.json().await?)
    }

    /// Returns a client-credentials access token, reusing a cached one.
    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.refresh_at > Instant::now()
        {
            return Ok(token.value.clone());
        }

        let response = self
            .client
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.secret))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await?;
        let token: TokenResponse = Self::read(response).await?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(0));
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        });
        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    fn provider(&self) -> Provider {
        Provider::PayPal
    }

    #[tracing::instrument(skip(self, request), fields(payment_id = %request.payment_id))]
    async fn initiate(&self, request: &InitiateRequest) -> Result<ProviderSession, GatewayError> {
        let token = self.access_token().await?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.order_id.to_string(),
                "custom_id": request.payment_id.to_string(),
                "description": request.description(),
                "amount": {
                    "currency_code": request.currency.as_str(),
                    "value": request.amount.to_decimal_string(),
                },
            }],
            "application_context": {
                "return_url": request.redirect_url,
                "cancel_url": request.redirect_url,
            },
        });

        let response = self
            .client
            .post(self.url("/v2/checkout/orders"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let order: OrderResponse = Self::read(response).await?;

        let approve = order
            .links
            .into_iter()
            .find(|link| link.rel == "approve")
            .ok_or_else(|| {
                GatewayError::Provider("no approval link in PayPal response".to_string())
            })?;

        Ok(ProviderSession {
            reference: order.id,
            payment_url: Some(approve.href),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn status(&self, reference: &str) -> Result<Option<PaymentStatus>, GatewayError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.url(&format!("/v2/checkout/orders/{reference}")))
            .bearer_auth(token)
            .send()
            .await?;
        let order: OrderResponse = Self::read(response).await?;
        Ok(order.status.as_deref().and_then(map_status))
    }

    #[tracing::instrument(skip(self))]
    async fn cancel(&self, reference: &str) -> Result<(), GatewayError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(self.url(&format!("/v2/checkout/orders/{reference}/cancel")))
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider(format!(
                "PayPal returned {status}: {body}"
            )));
        }
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
    use domain::{Currency, Money, PaymentMethod};
    use wiremock::matchers::{bearer_token, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> PayPalGateway {
        PayPalGateway::new(PayPalConfig {
            client_id: "client".into(),
            secret: "secret".into(),
            base_url: server.uri(),
            webhook_secret: "pp_secret".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "A21AA",
                "token_type": "Bearer",
                "expires_in": 32400
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[test]
    fn status_table() {
        assert_eq!(map_status("CREATED"), Some(PaymentStatus::Initiated));
        assert_eq!(map_status("SAVED"), Some(PaymentStatus::Initiated));
        assert_eq!(map_status("APPROVED"), Some(PaymentStatus::Processing));
        assert_eq!(map_status("COMPLETED"), Some(PaymentStatus::Completed));
        assert_eq!(map_status("VOIDED"), Some(PaymentStatus::Canceled));
        assert_eq!(map_status("PAYER_ACTION_REQUIRED"), None);
    }

    #[tokio::test]
    async fn initiate_creates_order_and_returns_approval_link() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders"))
            .and(bearer_token("A21AA"))
            .and(body_partial_json(json!({"intent": "CAPTURE"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "5O190127TN364715T",
                "status": "CREATED",
                "links": [
                    {"href": "https://api.paypal.example/v2/checkout/orders/5O190127TN364715T", "rel": "self", "method": "GET"},
                    {"href": "https://www.paypal.example/checkoutnow?token=5O190127TN364715T", "rel": "approve", "method": "GET"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/checkout/orders/5O190127TN364715T"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "5O190127TN364715T", "status": "APPROVED"})),
            )
            .mount(&server)
            .await;

        let gateway = gateway(&server);
        let session = gateway
            .initiate(&InitiateRequest {
                payment_id: PaymentId::new(),
                order_id: OrderId::new(),
                method: PaymentMethod::PayPal,
                amount: Money::from_cents(2599),
                currency: Currency::parse("USD").unwrap(),
                redirect_url: "https://shop.example/return".into(),
            })
            .await
            .unwrap();

        assert_eq!(session.reference, "5O190127TN364715T");
        assert_eq!(
            session.payment_url.as_deref(),
            Some("https://www.paypal.example/checkoutnow?token=5O190127TN364715T")
        );

        // The cached token is reused for the poll.
        let status = gateway.status("5O190127TN364715T").await.unwrap();
        assert_eq!(status, Some(PaymentStatus::Processing));
    }

    #[tokio::test]
    async fn missing_approval_link_is_an_error() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": "X", "links": []})),
            )
            .mount(&server)
            .await;

        let err = gateway(&server)
            .initiate(&InitiateRequest {
                payment_id: PaymentId::new(),
                order_id: OrderId::new(),
                method: PaymentMethod::PayPal,
                amount: Money::from_cents(100),
                currency: Currency::parse("USD").unwrap(),
                redirect_url: "https://shop.example/return".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Provider(_)));
    }

    #[test]
    fn capture_events_resolve_the_order_reference() {
        let body = serde_json::to_vec(&json!({
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {
                "id": "CAPTURE-1",
                "status": "COMPLETED",
                "supplementary_data": {"related_ids": {"order_id": "ORDER-1"}}
            }
        }))
        .unwrap();
        let update = decode_webhook(&body).unwrap().unwrap();
        assert_eq!(update.reference, "ORDER-1");
        assert_eq!(update.status, Some(PaymentStatus::Completed));
    }

    #[test]
    fn denied_capture_maps_to_failed() {
        let body = br#"{"event_type":"PAYMENT.CAPTURE.DENIED","resource":{"id":"ORDER-2","status":"DECLINED"}}"#;
        let update = decode_webhook(body).unwrap().unwrap();
        assert_eq!(update.status, Some(PaymentStatus::Failed));
    }

    #[tokio::test]
    async fn webhook_signature_is_checked_before_decoding() {
        let server = MockServer::start().await;
        let gateway = gateway(&server);
        let body = b"garbage";
        assert!(matches!(
            gateway.verify_webhook(Some("deadbeef"), body),
            Err(GatewayError::InvalidSignature)
        ));

        let sig = signature::sign("pp_secret", body).unwrap();
        assert!(matches!(
            gateway.verify_webhook(Some(&sig), body),
            Err(GatewayError::InvalidPayload(_))
        ));

        let ignored = br#"{"event_type":"BILLING.PLAN.CREATED","resource":{"id":"P-1"}}"#;
        let sig = signature::sign("pp_secret", ignored).unwrap();
        assert_eq!(gateway.verify_webhook(Some(&sig), ignored).unwrap(), None);
    }
}
