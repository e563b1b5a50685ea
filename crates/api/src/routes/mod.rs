//! HTTP route handlers.

pub mod admin;
pub mod cart;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;

use std::sync::Arc;

use axum::extract::FromRef;
use checkout::{CartService, CheckoutOrchestrator, InventoryLedger};
use store::Store;

use crate::auth::JwtVerifier;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store + Clone> {
    pub orchestrator: CheckoutOrchestrator<S>,
    pub cart: CartService<S>,
    pub ledger: InventoryLedger<S>,
    pub jwt: JwtVerifier,
}

impl<S: Store + Clone> FromRef<Arc<AppState<S>>> for JwtVerifier {
    fn from_ref(state: &Arc<AppState<S>>) -> Self {
        state.jwt.clone()
    }
}
