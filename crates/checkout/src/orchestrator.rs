//! Checkout orchestration: cart to order, payment initiation, cancellation.
//!
//! Every operation runs in short store transactions and never holds one
//! across a provider call. Payment initiation is split in two: the attempt is
//! recorded first (claiming the order's single active-payment slot), the
//! provider is called, then the outcome is written back under the order lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{OrderId, PaymentId, ProductId, UserId};
use domain::{
    CheckoutDetails, Currency, Order, OrderLine, OrderStatus, OrderStatusChange, PaymentAttempt,
    PaymentMethod, PaymentStatus, Provider,
};
use store::{OrderPage, OrderQuery, Store, StoreTx};

use crate::error::{CheckoutError, Result};
use crate::gateway::{GatewayError, GatewayRegistry, InitiateRequest};
use crate::inventory;
use crate::notifier::OrderNotifier;
use crate::reconciler::Reconciler;

/// Default bound on a provider's initiate call.
pub const DEFAULT_PAYMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Who is asking. Admins may read any order or payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Actor {
    pub fn customer(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }

    fn can_access(&self, order: &Order) -> bool {
        self.is_admin || order.is_owned_by(self.user_id)
    }
}

/// A requested move along the order lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: OrderStatus,
    /// Carrier tracking id; only accepted together with `shipped`.
    pub tracking_id: Option<String>,
    /// Recorded in the status history, not on the order.
    pub notes: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: OrderStatus) -> Self {
        Self {
            status,
            tracking_id: None,
            notes: None,
        }
    }

    pub fn with_tracking_id(mut self, tracking_id: impl Into<String>) -> Self {
        self.tracking_id = Some(tracking_id.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl From<OrderStatus> for StatusUpdate {
    fn from(status: OrderStatus) -> Self {
        Self::to(status)
    }
}

/// Orchestrates checkout across the store and the payment gateways.
#[derive(Clone)]
pub struct CheckoutOrchestrator<S: Store + Clone> {
    store: S,
    gateways: GatewayRegistry,
    reconciler: Reconciler<S>,
    payment_timeout: Duration,
}

impl<S: Store + Clone> CheckoutOrchestrator<S> {
    pub fn new(store: S, gateways: GatewayRegistry, notifier: Arc<dyn OrderNotifier>) -> Self {
        let reconciler = Reconciler::new(store.clone(), gateways.clone(), notifier);
        Self {
            store,
            gateways,
            reconciler,
            payment_timeout: DEFAULT_PAYMENT_TIMEOUT,
        }
    }

    pub fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    pub fn reconciler(&self) -> &Reconciler<S> {
        &self.reconciler
    }

    pub fn payment_timeout(&self) -> Duration {
        self.payment_timeout
    }

    /// Payment methods with a configured provider.
    pub fn payment_methods(&self) -> Vec<PaymentMethod> {
        self.gateways.methods()
    }

    /// Turns the user's cart into a `pending` order.
    ///
    /// Lines are reserved in product-id order. Any failure releases what this
    /// call reserved and rolls the whole transaction back.
    #[tracing::instrument(skip(self, details), fields(payment_method = %details.payment_method))]
    pub async fn create_order(&self, user_id: UserId, details: CheckoutDetails) -> Result<Order> {
        let started = Instant::now();
        if self.gateways.get(details.payment_method.provider()).is_err() {
            return Err(CheckoutError::Validation(format!(
                "payment method {} is not available",
                details.payment_method
            )));
        }

        let mut tx = self.store.begin().await?;
        let mut cart = tx.cart_lines(user_id).await?;
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        cart.sort_by_key(|line| line.product_id);

        let mut reserved = Vec::with_capacity(cart.len());
        let mut lines = Vec::with_capacity(cart.len());
        for item in &cart {
            match reserve_line(&mut tx, item.product_id, item.quantity).await {
                Ok(line) => {
                    reserved.push((item.product_id, item.quantity));
                    lines.push(line);
                }
                Err(err) => {
                    if let Err(release_err) = inventory::release_all(&mut tx, &reserved).await {
                        tracing::error!(error = %release_err, "releasing partial reservation failed");
                    }
                    return Err(err);
                }
            }
        }

        let order = Order::place(user_id, lines, details)?;
        tx.insert_order(&order).await?;
        tx.record_status_change(&order.placed()).await?;
        tx.clear_cart(user_id).await?;
        tx.commit().await?;

        metrics::counter!("checkout_orders_created_total").increment(1);
        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(order_id = %order.id(), total = %order.total(), "order created");
        Ok(order)
    }

    /// Opens a payment session for an order and moves it to `payment_pending`.
    #[tracing::instrument(skip(self, currency, redirect_url))]
    pub async fn initiate_payment(
        &self,
        user_id: UserId,
        order_id: OrderId,
        currency: Currency,
        redirect_url: String,
    ) -> Result<PaymentAttempt> {
        if redirect_url.trim().is_empty() {
            return Err(CheckoutError::Validation(
                "redirectUrl is required".to_string(),
            ));
        }

        // Claim the active-payment slot.
        let (attempt, method) = {
            let mut tx = self.store.begin().await?;
            let order = tx
                .lock_order(order_id)
                .await?
                .ok_or(CheckoutError::OrderNotFound(order_id))?;
            if !order.is_owned_by(user_id) {
                return Err(CheckoutError::Forbidden);
            }
            if tx.active_payment(order_id).await?.is_some() {
                return Err(CheckoutError::ActivePaymentExists(order_id));
            }
            if !order.status().can_initiate_payment() {
                return Err(CheckoutError::InvalidState {
                    status: order.status(),
                    action: "initiate payment for",
                });
            }
            let method = order.payment_method();
            let attempt = PaymentAttempt::open(order_id, method.provider(), order.total(), currency);
            tx.insert_payment(&attempt).await?;
            tx.commit().await?;
            (attempt, method)
        };

        let request = InitiateRequest {
            payment_id: attempt.id,
            order_id,
            method,
            amount: attempt.amount,
            currency: attempt.currency.clone(),
            redirect_url,
        };
        let outcome = match self.gateways.get(attempt.provider) {
            Ok(gateway) => {
                match tokio::time::timeout(self.payment_timeout, gateway.initiate(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::Timeout),
                }
            }
            Err(err) => Err(err),
        };

        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;
        let mut current = tx
            .payment(attempt.id)
            .await?
            .ok_or_else(|| CheckoutError::PaymentNotFound(attempt.id.to_string()))?;

        let session = match outcome {
            Ok(session) => session,
            Err(err) => {
                if current.status == PaymentStatus::Initiated {
                    current.fail(err.to_string());
                    tx.update_payment(&current, PaymentStatus::Initiated).await?;
                    tx.commit().await?;
                }
                metrics::counter!("payment_initiation_failures_total").increment(1);
                tracing::warn!(payment_id = %attempt.id, error = %err, "payment initiation failed");
                return Err(err.into());
            }
        };

        // The attempt was closed while the provider call was in flight.
        if current.status != PaymentStatus::Initiated {
            drop(tx);
            self.cancel_session_best_effort(current.provider, &session.reference)
                .await;
            return Err(CheckoutError::PaymentClosed {
                id: current.id,
                status: current.status,
            });
        }

        let previous = order.status();
        current.attach_session(&session.reference, session.payment_url);
        let change = order
            .transition(OrderStatus::PaymentPending)?
            .with_notes(Some(format!("payment {} opened with {}", current.id, current.provider)));
        order.set_payment_reference(&session.reference);
        if !tx.update_payment(&current, PaymentStatus::Initiated).await?
            || !tx.update_order(&order, previous).await?
        {
            return Err(CheckoutError::Conflict(order_id));
        }
        tx.record_status_change(&change).await?;
        tx.commit().await?;

        metrics::counter!("payments_initiated_total", "provider" => current.provider.as_str())
            .increment(1);
        tracing::info!(
            payment_id = %current.id,
            provider = %current.provider,
            reference = %session.reference,
            "payment initiated"
        );
        Ok(current)
    }

    /// Customer cancel: releases stock and closes any open payment attempt.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;
        if !order.is_owned_by(user_id) {
            return Err(CheckoutError::Forbidden);
        }
        if !order.status().can_customer_cancel() {
            return Err(CheckoutError::InvalidState {
                status: order.status(),
                action: "cancel",
            });
        }

        let update = StatusUpdate::to(OrderStatus::Canceled).with_notes("canceled by customer");
        let canceled = self.move_order(&mut tx, &mut order, update).await?;
        tx.commit().await?;

        tracing::info!(%order_id, "order canceled by customer");
        self.after_cancel(canceled).await;
        Ok(order)
    }

    /// Admin transition along the order lifecycle, optionally attaching a
    /// tracking id (shipped only) and history notes.
    ///
    /// Payment-driven statuses are owned by reconciliation and rejected here.
    #[tracing::instrument(skip(self, update))]
    pub async fn update_order_status(
        &self,
        order_id: OrderId,
        update: impl Into<StatusUpdate>,
    ) -> Result<Order> {
        let update = update.into();
        let next = update.status;
        if matches!(
            next,
            OrderStatus::Pending
                | OrderStatus::PaymentPending
                | OrderStatus::Paid
                | OrderStatus::PaymentFailed
                | OrderStatus::PaymentCanceled
        ) {
            return Err(CheckoutError::Validation(format!(
                "status {next} is set by payment processing"
            )));
        }

        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;
        let canceled = self.move_order(&mut tx, &mut order, update).await?;
        tx.commit().await?;

        tracing::info!(%order_id, status = %next, "order status updated");
        self.after_cancel(canceled).await;
        Ok(order)
    }

    /// Customer cancel of an open payment attempt.
    ///
    /// With a provider session the provider is asked first and the result is
    /// reconciled as `canceled`; without one the attempt is closed directly.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_payment(&self, user_id: UserId, payment_id: PaymentId) -> Result<PaymentAttempt> {
        let attempt = self.owned_payment(Actor::customer(user_id), payment_id).await?;
        if !attempt.is_active() {
            return Err(CheckoutError::PaymentClosed {
                id: attempt.id,
                status: attempt.status,
            });
        }

        match attempt.provider_reference.as_deref() {
            Some(reference) => {
                let gateway = self.gateways.get(attempt.provider)?;
                gateway.cancel(reference).await?;
                self.reconciler
                    .apply_provider_update(attempt.provider, reference, PaymentStatus::Canceled)
                    .await?;
            }
            None => {
                let mut tx = self.store.begin().await?;
                tx.lock_order(attempt.order_id).await?;
                if let Some(mut current) = tx.payment(payment_id).await?
                    && current.status == PaymentStatus::Initiated
                    && current.advance(PaymentStatus::Canceled)
                {
                    tx.update_payment(&current, PaymentStatus::Initiated).await?;
                    tx.commit().await?;
                }
            }
        }

        tracing::info!(%payment_id, "payment canceled by customer");
        let mut tx = self.store.begin().await?;
        tx.payment(payment_id)
            .await?
            .ok_or_else(|| CheckoutError::PaymentNotFound(payment_id.to_string()))
    }

    pub async fn get_order(&self, actor: Actor, order_id: OrderId) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .order(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;
        if !actor.can_access(&order) {
            return Err(CheckoutError::Forbidden);
        }
        Ok(order)
    }

    /// The user's orders, newest first.
    pub async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.orders_for_user(user_id).await?)
    }

    /// Orders across all users, filtered and paged. Admin only at the API.
    pub async fn list_all_orders(&self, query: &OrderQuery) -> Result<OrderPage> {
        let mut tx = self.store.begin().await?;
        Ok(tx.orders(query).await?)
    }

    /// The order's status changes, oldest first.
    pub async fn order_history(&self, actor: Actor, order_id: OrderId) -> Result<Vec<OrderStatusChange>> {
        let order = self.get_order(actor, order_id).await?;
        let mut tx = self.store.begin().await?;
        Ok(tx.status_history(order.id()).await?)
    }

    /// Every payment attempt made for an order, oldest first.
    pub async fn order_payments(&self, actor: Actor, order_id: OrderId) -> Result<Vec<PaymentAttempt>> {
        let order = self.get_order(actor, order_id).await?;
        let mut tx = self.store.begin().await?;
        Ok(tx.payments_for_order(order.id()).await?)
    }

    /// Returns an attempt, polling the provider first while it is still open.
    #[tracing::instrument(skip(self))]
    pub async fn get_payment(&self, actor: Actor, payment_id: PaymentId) -> Result<PaymentAttempt> {
        let attempt = self.owned_payment(actor, payment_id).await?;
        if !attempt.is_active() || attempt.provider_reference.is_none() {
            return Ok(attempt);
        }

        if let Err(err) = self.reconciler.refresh(payment_id).await {
            tracing::warn!(%payment_id, error = %err, "payment refresh failed");
        }
        let mut tx = self.store.begin().await?;
        tx.payment(payment_id)
            .await?
            .ok_or_else(|| CheckoutError::PaymentNotFound(payment_id.to_string()))
    }

    async fn owned_payment(&self, actor: Actor, payment_id: PaymentId) -> Result<PaymentAttempt> {
        let mut tx = self.store.begin().await?;
        let attempt = tx
            .payment(payment_id)
            .await?
            .ok_or_else(|| CheckoutError::PaymentNotFound(payment_id.to_string()))?;
        let order = tx
            .order(attempt.order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(attempt.order_id))?;
        if !actor.can_access(&order) {
            return Err(CheckoutError::Forbidden);
        }
        Ok(attempt)
    }

    /// Applies `update` to a locked order, releasing stock and closing the
    /// active attempt when the move cancels it. Returns the closed attempt.
    async fn move_order(
        &self,
        tx: &mut S::Tx,
        order: &mut Order,
        update: StatusUpdate,
    ) -> Result<Option<PaymentAttempt>> {
        let previous = order.status();
        let next = update.status;
        let change = order.transition(next)?.with_notes(update.notes);
        if let Some(tracking_id) = update.tracking_id {
            order.set_tracking_id(tracking_id)?;
        }

        let mut canceled = None;
        if next.releases_inventory() {
            for line in order.lines() {
                inventory::release_in(tx, line.product_id, line.quantity).await?;
            }
            if let Some(mut attempt) = tx.active_payment(order.id()).await? {
                let expected = attempt.status;
                if attempt.advance(PaymentStatus::Canceled) {
                    if !tx.update_payment(&attempt, expected).await? {
                        return Err(CheckoutError::Conflict(order.id()));
                    }
                    canceled = Some(attempt);
                }
            }
        }

        if !tx.update_order(order, previous).await? {
            return Err(CheckoutError::Conflict(order.id()));
        }
        tx.record_status_change(&change).await?;
        Ok(canceled)
    }

    async fn after_cancel(&self, canceled: Option<PaymentAttempt>) {
        if let Some(attempt) = canceled
            && let Some(reference) = attempt.provider_reference.as_deref()
        {
            self.cancel_session_best_effort(attempt.provider, reference)
                .await;
        }
    }

    async fn cancel_session_best_effort(&self, provider: Provider, reference: &str) {
        let result = match self.gateways.get(provider) {
            Ok(gateway) => gateway.cancel(reference).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            tracing::warn!(%provider, reference, error = %err, "provider session cancel failed");
        }
    }
}

async fn reserve_line<T: StoreTx>(
    tx: &mut T,
    product_id: ProductId,
    quantity: u32,
) -> Result<OrderLine> {
    let product = match tx.product(product_id).await? {
        Some(product) if product.active => product,
        _ => return Err(CheckoutError::ProductUnavailable(product_id)),
    };
    inventory::reserve_in(tx, product_id, quantity).await?;
    Ok(OrderLine::new(product_id, product.name, quantity, product.price)?)
}
