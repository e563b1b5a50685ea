//! HTTP API for cart, checkout and payments.
//!
//! Provides REST endpoints over the checkout orchestrator, with JWT
//! authentication, structured logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post, put};
use checkout::{
    CartService, CheckoutOrchestrator, EversendConfig, EversendGateway, GatewayRegistry,
    InMemoryGateway, InventoryLedger, OrderNotifier, PayPalConfig, PayPalGateway,
};
use domain::Provider;
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use auth::JwtVerifier;
use config::{Config, ConfigError};
use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + Clone>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        // Cart
        .route("/cart", get(routes::cart::get::<S>).delete(routes::cart::clear::<S>))
        .route("/cart/count", get(routes::cart::count::<S>))
        .route("/cart/items", post(routes::cart::add_item::<S>))
        .route(
            "/cart/items/{id}",
            put(routes::cart::set_quantity::<S>).delete(routes::cart::remove_item::<S>),
        )
        // Orders
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/orders/{id}/history", get(routes::orders::history::<S>))
        // Payments
        .route("/payments/methods", get(routes::payments::methods::<S>))
        .route("/payments/initiate", post(routes::payments::initiate::<S>))
        .route("/payments/webhook", post(routes::payments::webhook::<S>))
        .route("/payments/{id}", get(routes::payments::get::<S>))
        .route("/payments/{id}/cancel", post(routes::payments::cancel::<S>))
        // Admin
        .route(
            "/admin/products/{id}",
            put(routes::admin::upsert_product::<S>),
        )
        .route("/admin/orders", get(routes::admin::list_orders::<S>))
        .route(
            "/admin/orders/{id}/status",
            patch(routes::admin::update_order_status::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over `store`.
pub fn create_state<S: Store + Clone>(
    store: S,
    gateways: GatewayRegistry,
    notifier: Arc<dyn OrderNotifier>,
    config: &Config,
) -> Arc<AppState<S>> {
    let orchestrator = CheckoutOrchestrator::new(store.clone(), gateways, notifier)
        .with_payment_timeout(config.payment_timeout);

    Arc::new(AppState {
        orchestrator,
        cart: CartService::new(store.clone()),
        ledger: InventoryLedger::new(store),
        jwt: JwtVerifier::new(&config.jwt_secret),
    })
}

/// Builds one adapter per configured provider.
///
/// With no provider configured, simulated gateways stand in for both, but only
/// when [`Config::allows_simulated_payments`] says so. They sign webhooks with
/// a secret generated for this process, so callbacks cannot be forged.
pub fn build_gateways(config: &Config) -> Result<GatewayRegistry, ConfigError> {
    let mut registry = GatewayRegistry::new();

    if let Some(eversend) = &config.eversend {
        registry.register(Arc::new(EversendGateway::new(EversendConfig {
            api_key: eversend.api_key.clone(),
            base_url: eversend.base_url.clone(),
            webhook_secret: eversend.webhook_secret.clone(),
            callback_url: config.callback_url.clone(),
            timeout: config.payment_timeout,
        })?));
    }
    if let Some(paypal) = &config.paypal {
        registry.register(Arc::new(PayPalGateway::new(PayPalConfig {
            client_id: paypal.client_id.clone(),
            secret: paypal.secret.clone(),
            base_url: paypal.base_url.clone(),
            webhook_secret: paypal.webhook_secret.clone(),
            timeout: config.payment_timeout,
        })?));
    }

    if registry.is_empty() {
        if !config.allows_simulated_payments() {
            return Err(ConfigError::NoPaymentProvider);
        }
        tracing::warn!("no payment provider configured, using simulated gateways");
        let webhook_secret = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        for provider in Provider::ALL {
            registry.register(Arc::new(InMemoryGateway::with_secret(
                provider,
                webhook_secret.clone(),
            )));
        }
    }
    Ok(registry)
}
