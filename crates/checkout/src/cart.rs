//! Per-user cart operations.

use chrono::Utc;
use common::{CartLineId, ProductId, UserId};
use domain::{CartLine, CartView, Product};
use store::{Store, StoreTx};

use crate::error::{CheckoutError, Result};

/// Cart service. Stock checks here are advisory; checkout reserves for real.
#[derive(Clone)]
pub struct CartService<S: Store> {
    store: S,
}

impl<S: Store> CartService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the user's lines in creation order.
    pub async fn get(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.cart_lines(user_id).await?)
    }

    /// Returns the user's cart with its computed total.
    pub async fn view(&self, user_id: UserId) -> Result<CartView> {
        Ok(CartView::new(self.get(user_id).await?)?)
    }

    /// Sum of quantities across the user's lines.
    pub async fn item_count(&self, user_id: UserId) -> Result<u64> {
        let lines = self.get(user_id).await?;
        Ok(lines.iter().map(|line| u64::from(line.quantity)).sum())
    }

    /// Adds `delta` units of a product, creating the line if needed.
    ///
    /// A resulting quantity of zero or less removes the line and returns `None`.
    #[tracing::instrument(skip(self))]
    pub async fn add_or_update(
        &self,
        user_id: UserId,
        product_id: ProductId,
        delta: i32,
    ) -> Result<Option<CartLine>> {
        if delta == 0 {
            return Err(CheckoutError::Validation(
                "quantity must not be 0".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        let product = sellable(&mut tx, product_id).await?;
        let existing = tx.cart_line_for_product(user_id, product_id).await?;

        let current = existing.as_ref().map_or(0, |line| i64::from(line.quantity));
        let quantity = current + i64::from(delta);

        let line = match existing {
            Some(line) if quantity <= 0 => {
                tx.delete_cart_line(user_id, line.id).await?;
                None
            }
            None if quantity <= 0 => {
                return Err(CheckoutError::Validation(
                    "quantity must be greater than 0".to_string(),
                ));
            }
            existing => {
                let quantity = u32::try_from(quantity).map_err(|_| {
                    CheckoutError::Validation("quantity is too large".to_string())
                })?;
                ensure_stock(&product, quantity)?;
                let line = match existing {
                    Some(mut line) => {
                        line.quantity = quantity;
                        line.updated_at = Utc::now();
                        line
                    }
                    None => CartLine::new(user_id, product_id, &product.name, quantity, product.price),
                };
                line.line_total()?;
                tx.upsert_cart_line(&line).await?;
                Some(line)
            }
        };

        tx.commit().await?;
        Ok(line)
    }

    /// Sets a line's quantity; 0 deletes the line and returns `None`.
    #[tracing::instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        user_id: UserId,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<Option<CartLine>> {
        let mut tx = self.store.begin().await?;
        let mut line = tx
            .cart_line(user_id, line_id)
            .await?
            .ok_or(CheckoutError::CartLineNotFound(line_id))?;

        if quantity == 0 {
            tx.delete_cart_line(user_id, line_id).await?;
            tx.commit().await?;
            return Ok(None);
        }

        let product = sellable(&mut tx, line.product_id).await?;
        ensure_stock(&product, quantity)?;

        line.quantity = quantity;
        line.updated_at = Utc::now();
        line.line_total()?;
        tx.upsert_cart_line(&line).await?;
        tx.commit().await?;
        Ok(Some(line))
    }

    pub async fn remove_line(&self, user_id: UserId, line_id: CartLineId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        if !tx.delete_cart_line(user_id, line_id).await? {
            return Err(CheckoutError::CartLineNotFound(line_id));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Removes every line, returning how many were removed.
    pub async fn clear(&self, user_id: UserId) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let removed = tx.clear_cart(user_id).await?;
        tx.commit().await?;
        Ok(removed)
    }
}

async fn sellable<T: StoreTx>(tx: &mut T, product_id: ProductId) -> Result<Product> {
    match tx.product(product_id).await? {
        Some(product) if product.active => Ok(product),
        _ => Err(CheckoutError::ProductUnavailable(product_id)),
    }
}

fn ensure_stock(product: &Product, quantity: u32) -> Result<()> {
    if product.can_supply(quantity) {
        Ok(())
    } else {
        Err(CheckoutError::InsufficientStock(product.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{DomainError, Money};
    use store::InMemoryStore;

    async fn setup(stock: u32) -> (CartService<InMemoryStore>, InMemoryStore, ProductId) {
        let store = InMemoryStore::new();
        let product = Product::new(ProductId::new(), "Mug", Money::from_cents(1250), stock).unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_product(&product).await.unwrap();
        tx.commit().await.unwrap();
        (CartService::new(store.clone()), store, product.id)
    }

    #[tokio::test]
    async fn test_add_merges_into_existing_line() {
        let (cart, _, product_id) = setup(10).await;
        let user = UserId::new();

        cart.add_or_update(user, product_id, 2).await.unwrap();
        let line = cart.add_or_update(user, product_id, 3).await.unwrap().unwrap();
        assert_eq!(line.quantity, 5);

        let view = cart.view(user).await.unwrap();
        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.total, Money::from_cents(6250));
        assert_eq!(cart.item_count(user).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_negative_delta_removes_line() {
        let (cart, _, product_id) = setup(10).await;
        let user = UserId::new();

        cart.add_or_update(user, product_id, 2).await.unwrap();
        assert!(cart.add_or_update(user, product_id, -2).await.unwrap().is_none());
        assert!(cart.get(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_delta_rejected() {
        let (cart, _, product_id) = setup(10).await;
        assert!(matches!(
            cart.add_or_update(UserId::new(), product_id, 0).await,
            Err(CheckoutError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_stock_check_is_applied_to_resulting_quantity() {
        let (cart, _, product_id) = setup(4).await;
        let user = UserId::new();

        cart.add_or_update(user, product_id, 3).await.unwrap();
        let err = cart.add_or_update(user, product_id, 2).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InsufficientStock(id) if id == product_id));
        assert_eq!(cart.get(user).await.unwrap()[0].quantity, 3);
    }

    #[tokio::test]
    async fn test_unknown_or_inactive_product_is_unavailable() {
        let (cart, store, product_id) = setup(4).await;
        let user = UserId::new();

        assert!(matches!(
            cart.add_or_update(user, ProductId::new(), 1).await,
            Err(CheckoutError::ProductUnavailable(_))
        ));

        let mut tx = store.begin().await.unwrap();
        let mut product = tx.product(product_id).await.unwrap().unwrap();
        product.active = false;
        tx.upsert_product(&product).await.unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(
            cart.add_or_update(user, product_id, 1).await,
            Err(CheckoutError::ProductUnavailable(id)) if id == product_id
        ));
    }

    #[tokio::test]
    async fn test_set_quantity_and_remove() {
        let (cart, _, product_id) = setup(10).await;
        let user = UserId::new();
        let line = cart.add_or_update(user, product_id, 1).await.unwrap().unwrap();

        let updated = cart.set_quantity(user, line.id, 7).await.unwrap().unwrap();
        assert_eq!(updated.quantity, 7);

        assert!(cart.set_quantity(user, line.id, 0).await.unwrap().is_none());
        assert!(matches!(
            cart.remove_line(user, line.id).await,
            Err(CheckoutError::CartLineNotFound(id)) if id == line.id
        ));
    }

    #[tokio::test]
    async fn test_unpriceable_quantity_is_rejected() {
        let store = InMemoryStore::new();
        let product = Product::new(
            ProductId::new(),
            "Yacht",
            Money::from_cents(5_000_000_000_000_000_000),
            10,
        )
        .unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_product(&product).await.unwrap();
        tx.commit().await.unwrap();
        let cart = CartService::new(store);
        let user = UserId::new();

        let line = cart.add_or_update(user, product.id, 1).await.unwrap().unwrap();
        assert!(matches!(
            cart.add_or_update(user, product.id, 1).await,
            Err(CheckoutError::Domain(DomainError::AmountOverflow))
        ));
        assert!(matches!(
            cart.set_quantity(user, line.id, 3).await,
            Err(CheckoutError::Domain(DomainError::AmountOverflow))
        ));
        assert_eq!(cart.view(user).await.unwrap().item_count, 1);
    }

    #[tokio::test]
    async fn test_lines_are_private_to_their_user() {
        let (cart, _, product_id) = setup(10).await;
        let alice = UserId::new();
        let bob = UserId::new();
        let line = cart.add_or_update(alice, product_id, 1).await.unwrap().unwrap();

        assert!(matches!(
            cart.set_quantity(bob, line.id, 2).await,
            Err(CheckoutError::CartLineNotFound(_))
        ));
        assert_eq!(cart.clear(bob).await.unwrap(), 0);
        assert_eq!(cart.clear(alice).await.unwrap(), 1);
    }
}
