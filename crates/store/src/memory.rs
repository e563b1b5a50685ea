use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{CartLineId, OrderId, PaymentId, ProductId, UserId};
use domain::{
    CartLine, Order, OrderStatus, OrderStatusChange, PaymentAttempt, PaymentStatus, Product,
    Provider,
};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::{
    OrderPage, OrderQuery, Result, StoreError,
    store::{Store, StoreTx},
};

#[derive(Debug, Clone, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    /// Kept in insertion order, which is creation order.
    cart_lines: Vec<CartLine>,
    orders: HashMap<OrderId, Order>,
    /// Kept in insertion order, which is creation order.
    payments: Vec<PaymentAttempt>,
    /// Append-only.
    status_history: Vec<OrderStatusChange>,
}

/// In-memory store for tests and local runs.
///
/// Transactions are serialized by a single writer lock and work on a private
/// copy of the state, which replaces the shared state on commit.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current stock of a product, if it exists.
    pub async fn stock(&self, product_id: ProductId) -> Option<u32> {
        self.state
            .read()
            .await
            .products
            .get(&product_id)
            .map(|p| p.stock)
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the total number of payment attempts stored.
    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx> {
        let guard = self.state.clone().write_owned().await;
        let working = guard.clone();
        Ok(InMemoryTx { guard, working })
    }
}

/// A transaction over [`InMemoryStore`].
pub struct InMemoryTx {
    guard: OwnedRwLockWriteGuard<State>,
    working: State,
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn product(&mut self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn upsert_product(&mut self, product: &Product) -> Result<()> {
        self.working.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn reserve_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<()> {
        let product = self
            .working
            .products
            .get_mut(&product_id)
            .ok_or(StoreError::ProductNotFound(product_id))?;
        if product.stock < quantity {
            return Err(StoreError::InsufficientStock {
                product_id,
                requested: quantity,
                available: product.stock,
            });
        }
        product.stock -= quantity;
        Ok(())
    }

    async fn release_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<()> {
        let product = self
            .working
            .products
            .get_mut(&product_id)
            .ok_or(StoreError::ProductNotFound(product_id))?;
        product.stock = product.stock.saturating_add(quantity);
        Ok(())
    }

    async fn cart_lines(&mut self, user_id: UserId) -> Result<Vec<CartLine>> {
        Ok(self
            .working
            .cart_lines
            .iter()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn cart_line(
        &mut self,
        user_id: UserId,
        line_id: CartLineId,
    ) -> Result<Option<CartLine>> {
        Ok(self
            .working
            .cart_lines
            .iter()
            .find(|l| l.user_id == user_id && l.id == line_id)
            .cloned())
    }

    async fn cart_line_for_product(
        &mut self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<CartLine>> {
        Ok(self
            .working
            .cart_lines
            .iter()
            .find(|l| l.user_id == user_id && l.product_id == product_id)
            .cloned())
    }

    async fn upsert_cart_line(&mut self, line: &CartLine) -> Result<()> {
        if !self.working.products.contains_key(&line.product_id) {
            return Err(StoreError::ProductNotFound(line.product_id));
        }
        match self
            .working
            .cart_lines
            .iter_mut()
            .find(|l| l.id == line.id)
        {
            Some(existing) => *existing = line.clone(),
            None => self.working.cart_lines.push(line.clone()),
        }
        Ok(())
    }

    async fn delete_cart_line(&mut self, user_id: UserId, line_id: CartLineId) -> Result<bool> {
        let before = self.working.cart_lines.len();
        self.working
            .cart_lines
            .retain(|l| !(l.user_id == user_id && l.id == line_id));
        Ok(self.working.cart_lines.len() < before)
    }

    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64> {
        let before = self.working.cart_lines.len();
        self.working.cart_lines.retain(|l| l.user_id != user_id);
        Ok((before - self.working.cart_lines.len()) as u64)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        if self.working.orders.contains_key(&order.id()) {
            return Err(StoreError::Integrity(format!(
                "order {} already exists",
                order.id()
            )));
        }
        self.working.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn order(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        // The writer lock held by this transaction already excludes everyone else.
        self.order(id).await
    }

    async fn orders_for_user(&mut self, user_id: UserId) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .working
            .orders
            .values()
            .filter(|o| o.user_id() == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(orders)
    }

    async fn orders(&mut self, query: &OrderQuery) -> Result<OrderPage> {
        let mut orders: Vec<&Order> = self
            .working
            .orders
            .values()
            .filter(|o| query.matches(o))
            .collect();
        orders.sort_by(|a, b| {
            let order = a.created_at().cmp(&b.created_at()).then(a.id().cmp(&b.id()));
            if query.oldest_first { order } else { order.reverse() }
        });
        let total = orders.len() as u64;
        let orders = orders
            .into_iter()
            .skip(query.skip())
            .take(query.page_size())
            .cloned()
            .collect();
        Ok(OrderPage { orders, total })
    }

    async fn update_order(&mut self, order: &Order, expected: OrderStatus) -> Result<bool> {
        match self.working.orders.get_mut(&order.id()) {
            Some(stored) if stored.status() == expected => {
                *stored = order.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_status_change(&mut self, change: &OrderStatusChange) -> Result<()> {
        if !self.working.orders.contains_key(&change.order_id) {
            return Err(StoreError::Integrity(format!(
                "status change references unknown order {}",
                change.order_id
            )));
        }
        self.working.status_history.push(change.clone());
        Ok(())
    }

    async fn status_history(&mut self, order_id: OrderId) -> Result<Vec<OrderStatusChange>> {
        Ok(self
            .working
            .status_history
            .iter()
            .filter(|c| c.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn insert_payment(&mut self, attempt: &PaymentAttempt) -> Result<()> {
        if !self.working.orders.contains_key(&attempt.order_id) {
            return Err(StoreError::Integrity(format!(
                "payment {} references unknown order {}",
                attempt.id, attempt.order_id
            )));
        }
        let conflict = attempt.is_active()
            && self
                .working
                .payments
                .iter()
                .any(|p| p.order_id == attempt.order_id && p.is_active());
        if conflict {
            return Err(StoreError::ActivePaymentExists(attempt.order_id));
        }
        self.working.payments.push(attempt.clone());
        Ok(())
    }

    async fn payment(&mut self, id: PaymentId) -> Result<Option<PaymentAttempt>> {
        Ok(self.working.payments.iter().find(|p| p.id == id).cloned())
    }

    async fn payment_by_reference(
        &mut self,
        provider: Provider,
        reference: &str,
    ) -> Result<Option<PaymentAttempt>> {
        Ok(self
            .working
            .payments
            .iter()
            .find(|p| p.provider == provider && p.provider_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn payments_for_order(&mut self, order_id: OrderId) -> Result<Vec<PaymentAttempt>> {
        Ok(self
            .working
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn active_payment(&mut self, order_id: OrderId) -> Result<Option<PaymentAttempt>> {
        Ok(self
            .working
            .payments
            .iter()
            .find(|p| p.order_id == order_id && p.is_active())
            .cloned())
    }

    async fn active_payments(&mut self) -> Result<Vec<PaymentAttempt>> {
        Ok(self
            .working
            .payments
            .iter()
            .filter(|p| p.is_active())
            .cloned()
            .collect())
    }

    async fn update_payment(
        &mut self,
        attempt: &PaymentAttempt,
        expected: PaymentStatus,
    ) -> Result<bool> {
        match self.working.payments.iter_mut().find(|p| p.id == attempt.id) {
            Some(stored) if stored.status == expected => {
                *stored = attempt.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit(self) -> Result<()> {
        let InMemoryTx { mut guard, working } = self;
        *guard = working;
        Ok(())
    }
}
