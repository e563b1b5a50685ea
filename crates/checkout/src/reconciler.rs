//! Applies provider-reported payment status to attempts and orders.
//!
//! Webhooks and polls converge here. Updates are idempotent: a repeated or
//! out-of-order report against a terminal attempt or an order that no longer
//! awaits payment is a no-op.

use std::sync::Arc;

use common::{OrderId, PaymentId};
use domain::{Order, OrderStatus, PaymentStatus, Provider};
use store::{Store, StoreError, StoreTx};

use crate::error::{CheckoutError, Result};
use crate::gateway::{GatewayError, GatewayRegistry};
use crate::inventory;
use crate::notifier::OrderNotifier;

/// The result of applying a provider update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The update changed state; carries the order's resulting status.
    Applied(OrderStatus),
    /// Nothing changed.
    NoOp,
}

/// The result of handling a verified webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed(ReconcileOutcome),
    /// Authentic, but carried nothing to apply.
    Ignored,
}

#[derive(Clone)]
pub struct Reconciler<S: Store> {
    store: S,
    gateways: GatewayRegistry,
    notifier: Arc<dyn OrderNotifier>,
}

impl<S: Store> Reconciler<S> {
    pub fn new(store: S, gateways: GatewayRegistry, notifier: Arc<dyn OrderNotifier>) -> Self {
        Self {
            store,
            gateways,
            notifier,
        }
    }

    /// Applies a normalized status reported by `provider` for `reference`.
    #[tracing::instrument(skip(self))]
    pub async fn apply_provider_update(
        &self,
        provider: Provider,
        reference: &str,
        status: PaymentStatus,
    ) -> Result<ReconcileOutcome> {
        let mut tx = self.store.begin().await?;

        let found = tx
            .payment_by_reference(provider, reference)
            .await?
            .ok_or_else(|| CheckoutError::PaymentNotFound(reference.to_string()))?;
        let mut order = tx
            .lock_order(found.order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(found.order_id))?;
        // Re-read under the order lock.
        let mut attempt = tx
            .payment(found.id)
            .await?
            .ok_or_else(|| CheckoutError::PaymentNotFound(reference.to_string()))?;

        let previous_attempt = attempt.status;
        let previous_order = order.status();
        if !order.status().accepts_payment_updates() || !attempt.advance(status) {
            metrics::counter!("payment_updates_noop_total").increment(1);
            tracing::debug!(
                payment_id = %attempt.id,
                attempt_status = %previous_attempt,
                order_status = %previous_order,
                "payment update discarded"
            );
            return Ok(ReconcileOutcome::NoOp);
        }

        let target = match status {
            PaymentStatus::Completed => Some(OrderStatus::Paid),
            PaymentStatus::Failed => Some(OrderStatus::PaymentFailed),
            PaymentStatus::Canceled => Some(OrderStatus::PaymentCanceled),
            PaymentStatus::Initiated | PaymentStatus::Processing => None,
        };

        if !tx.update_payment(&attempt, previous_attempt).await? {
            return Err(lost_update(order.id(), "payment"));
        }
        if let Some(target) = target {
            let change = order
                .transition(target)?
                .with_notes(Some(format!("{provider} reported payment {status}")));
            if target.releases_inventory() {
                for line in order.lines() {
                    inventory::release_in(&mut tx, line.product_id, line.quantity).await?;
                }
            }
            if !tx.update_order(&order, previous_order).await? {
                return Err(lost_update(order.id(), "order"));
            }
            tx.record_status_change(&change).await?;
        }
        tx.commit().await?;

        metrics::counter!("payment_updates_applied_total").increment(1);
        tracing::info!(
            order_id = %order.id(),
            payment_id = %attempt.id,
            payment_status = %attempt.status,
            order_status = %order.status(),
            "payment update applied"
        );

        if target == Some(OrderStatus::Paid) {
            self.send_confirmation(order.clone());
        }
        Ok(ReconcileOutcome::Applied(order.status()))
    }

    /// Verifies a webhook with the matching adapter, then applies it.
    ///
    /// The signature is checked before any lookup.
    #[tracing::instrument(skip(self, signature, body), fields(body_len = body.len()))]
    pub async fn handle_webhook(
        &self,
        provider: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome> {
        let gateway = provider
            .and_then(|p| p.parse::<Provider>().ok())
            .and_then(|p| self.gateways.get(p).ok());
        let Some(gateway) = gateway else {
            metrics::counter!("webhook_rejected_total").increment(1);
            tracing::warn!(provider, "webhook for unknown provider");
            return Err(GatewayError::InvalidSignature.into());
        };

        let update = match gateway.verify_webhook(signature, body) {
            Ok(Some(update)) => update,
            Ok(None) => return Ok(WebhookOutcome::Ignored),
            Err(GatewayError::InvalidSignature) => {
                metrics::counter!("webhook_rejected_total").increment(1);
                tracing::warn!(provider = %gateway.provider(), "webhook signature rejected");
                return Err(GatewayError::InvalidSignature.into());
            }
            Err(GatewayError::InvalidPayload(reason)) => {
                tracing::warn!(provider = %gateway.provider(), %reason, "undecodable webhook");
                return Ok(WebhookOutcome::Ignored);
            }
            Err(err) => return Err(err.into()),
        };

        let Some(status) = update.status else {
            tracing::warn!(
                provider = %update.provider,
                reference = %update.reference,
                "webhook with unrecognized status"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let outcome = self
            .apply_provider_update(update.provider, &update.reference, status)
            .await?;
        Ok(WebhookOutcome::Processed(outcome))
    }

    /// Polls the provider for a non-terminal attempt and applies the answer.
    ///
    /// Gateway errors are logged and leave state unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self, payment_id: PaymentId) -> Result<ReconcileOutcome> {
        let attempt = {
            let mut tx = self.store.begin().await?;
            tx.payment(payment_id)
                .await?
                .ok_or_else(|| CheckoutError::PaymentNotFound(payment_id.to_string()))?
        };

        let Some(reference) = attempt.provider_reference.as_deref() else {
            return Ok(ReconcileOutcome::NoOp);
        };
        if !attempt.is_active() {
            return Ok(ReconcileOutcome::NoOp);
        }

        let gateway = self.gateways.get(attempt.provider)?;
        match gateway.status(reference).await {
            Ok(Some(status)) => self.apply_provider_update(attempt.provider, reference, status).await,
            Ok(None) => {
                tracing::warn!(%payment_id, reference, "provider reported unrecognized status");
                Ok(ReconcileOutcome::NoOp)
            }
            Err(err) => {
                tracing::warn!(%payment_id, reference, error = %err, "status poll failed");
                Ok(ReconcileOutcome::NoOp)
            }
        }
    }

    fn send_confirmation(&self, order: Order) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(err) = notifier.order_paid(&order).await {
                tracing::error!(order_id = %order.id(), error = %err, "order confirmation failed");
            }
        });
    }
}

/// A compare-and-set miss while the order row is locked. Nothing else may
/// write the row.
fn lost_update(order_id: OrderId, row: &str) -> CheckoutError {
    tracing::error!(%order_id, row, "status update lost under order lock");
    CheckoutError::Store(StoreError::Integrity(format!(
        "{row} status for order {order_id} changed under lock"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lost_update_is_a_store_fault() {
        let err = lost_update(OrderId::new(), "order");
        assert!(matches!(err, CheckoutError::Store(StoreError::Integrity(_))));
    }
}
