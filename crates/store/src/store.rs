use async_trait::async_trait;
use common::{CartLineId, OrderId, PaymentId, ProductId, UserId};
use domain::{
    CartLine, Order, OrderStatus, OrderStatusChange, PaymentAttempt, PaymentStatus, Product,
    Provider,
};

use crate::{OrderPage, OrderQuery, Result};

/// Entry point for a persistence backend.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// The transaction type handed out by [`Store::begin`].
    type Tx: StoreTx;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// A unit of work against the store.
///
/// Dropping a transaction without calling [`StoreTx::commit`] discards every
/// change made through it. Mutations of an order or its payment attempts must
/// be preceded by [`StoreTx::lock_order`] on that order, so concurrent writers
/// serialize on the order row.
#[async_trait]
pub trait StoreTx: Send + Sized {
    // Catalog & inventory

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>>;

    /// Inserts or replaces a catalog product.
    async fn upsert_product(&mut self, product: &Product) -> Result<()>;

    /// Decrements stock by `quantity` only if at least that much is on hand.
    ///
    /// Fails with `InsufficientStock` or `ProductNotFound` and leaves the
    /// stock untouched.
    async fn reserve_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<()>;

    /// Increments stock by `quantity`. Fails only if the product is unknown.
    async fn release_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<()>;

    // Cart

    /// Returns a user's cart lines, oldest first.
    async fn cart_lines(&mut self, user_id: UserId) -> Result<Vec<CartLine>>;

    async fn cart_line(&mut self, user_id: UserId, line_id: CartLineId)
    -> Result<Option<CartLine>>;

    async fn cart_line_for_product(
        &mut self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<CartLine>>;

    /// Inserts or replaces a cart line (keyed by line id).
    async fn upsert_cart_line(&mut self, line: &CartLine) -> Result<()>;

    /// Deletes one line. Returns false if the user has no such line.
    async fn delete_cart_line(&mut self, user_id: UserId, line_id: CartLineId) -> Result<bool>;

    /// Deletes every line of a user's cart, returning how many were removed.
    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64>;

    // Orders

    /// Persists a new order together with its lines.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Reads an order without locking it.
    async fn order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Reads an order and holds its row lock until the transaction ends.
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Returns a user's orders, newest first.
    async fn orders_for_user(&mut self, user_id: UserId) -> Result<Vec<Order>>;

    /// Returns one page of orders across all users plus the matching total.
    async fn orders(&mut self, query: &OrderQuery) -> Result<OrderPage>;

    /// Writes the mutable order fields (status, payment reference, tracking
    /// id, updated_at) only if the stored status still equals `expected`.
    ///
    /// Returns false when the compare-and-set lost.
    async fn update_order(&mut self, order: &Order, expected: OrderStatus) -> Result<bool>;

    /// Appends an entry to the order's status history.
    async fn record_status_change(&mut self, change: &OrderStatusChange) -> Result<()>;

    /// Returns the order's status history, oldest first.
    async fn status_history(&mut self, order_id: OrderId) -> Result<Vec<OrderStatusChange>>;

    // Payment attempts

    /// Inserts an attempt. Fails with `ActivePaymentExists` if the attempt is
    /// non-terminal and the order already has a non-terminal attempt.
    async fn insert_payment(&mut self, attempt: &PaymentAttempt) -> Result<()>;

    async fn payment(&mut self, id: PaymentId) -> Result<Option<PaymentAttempt>>;

    async fn payment_by_reference(
        &mut self,
        provider: Provider,
        reference: &str,
    ) -> Result<Option<PaymentAttempt>>;

    /// Returns every attempt for an order, oldest first.
    async fn payments_for_order(&mut self, order_id: OrderId) -> Result<Vec<PaymentAttempt>>;

    /// Returns the order's non-terminal attempt, if any.
    async fn active_payment(&mut self, order_id: OrderId) -> Result<Option<PaymentAttempt>>;

    /// Returns every non-terminal attempt across all orders, oldest first.
    async fn active_payments(&mut self) -> Result<Vec<PaymentAttempt>>;

    /// Writes the mutable attempt fields only if the stored status still
    /// equals `expected`. Returns false when the compare-and-set lost.
    async fn update_payment(
        &mut self,
        attempt: &PaymentAttempt,
        expected: PaymentStatus,
    ) -> Result<bool>;

    /// Makes every change in this transaction durable.
    async fn commit(self) -> Result<()>;
}
