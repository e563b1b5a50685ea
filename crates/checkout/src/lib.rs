//! Checkout and payment settlement.
//!
//! Turns carts into orders with atomically reserved inventory, opens payment
//! sessions with external providers, and reconciles the providers' reported
//! status (webhooks or polling) back into orders.
//!
//! The flow:
//! 1. Cart lines are collected per user ([`CartService`])
//! 2. Checkout reserves every line and creates a `pending` order
//!    ([`CheckoutOrchestrator::create_order`])
//! 3. A payment session is opened with the order's provider
//!    ([`CheckoutOrchestrator::initiate_payment`])
//! 4. Provider updates settle the order ([`Reconciler`], [`PaymentPoller`])

pub mod cart;
pub mod error;
pub mod gateway;
pub mod inventory;
pub mod notifier;
pub mod orchestrator;
pub mod poller;
pub mod reconciler;

pub use cart::CartService;
pub use error::{CheckoutError, Result};
pub use gateway::{
    EversendConfig, EversendGateway, GatewayError, GatewayRegistry, InMemoryGateway,
    PayPalConfig, PayPalGateway, PaymentGateway,
};
pub use inventory::InventoryLedger;
pub use notifier::{InMemoryNotifier, LogNotifier, OrderNotifier};
pub use orchestrator::{Actor, CheckoutOrchestrator, DEFAULT_PAYMENT_TIMEOUT, StatusUpdate};
pub use poller::{PaymentPoller, PollSummary};
pub use reconciler::{ReconcileOutcome, Reconciler, WebhookOutcome};
