//! Order confirmation side effects.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::OrderId;
use domain::Order;
use thiserror::Error;

/// A notification could not be delivered.
#[derive(Debug, Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Sends the order confirmation once payment completes.
///
/// Called from a spawned task; failures are logged and never reach the
/// payment provider.
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn order_paid(&self, order: &Order) -> Result<(), NotifyError>;
}

/// Writes confirmations to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl OrderNotifier for LogNotifier {
    async fn order_paid(&self, order: &Order) -> Result<(), NotifyError> {
        tracing::info!(
            order_id = %order.id(),
            user_id = %order.user_id(),
            total = %order.total(),
            "order confirmation sent"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<OrderId>,
    fail: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the notifier to fail every send.
    pub fn set_fail(&self, fail: bool) {
        self.state.write().unwrap().fail = fail;
    }

    /// Returns how many confirmations were sent for an order.
    pub fn sent_for(&self, order_id: OrderId) -> usize {
        self.state
            .read()
            .unwrap()
            .sent
            .iter()
            .filter(|id| **id == order_id)
            .count()
    }

    pub fn sent_count(&self) -> usize {
        self.state.read().unwrap().sent.len()
    }
}

#[async_trait]
impl OrderNotifier for InMemoryNotifier {
    async fn order_paid(&self, order: &Order) -> Result<(), NotifyError> {
        let mut state = self.state.write().unwrap();
        if state.fail {
            return Err(NotifyError("smtp unavailable".to_string()));
        }
        state.sent.push(order.id());
        Ok(())
    }
}
