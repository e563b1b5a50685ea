//! Inventory ledger: conditional stock reservations and releases.
//!
//! The free functions work inside a caller's transaction so the orchestrator
//! can compose them with order writes; [`InventoryLedger`] wraps each one in
//! its own short transaction.

use common::ProductId;
use domain::Product;
use store::{Store, StoreError, StoreTx};

use crate::error::{CheckoutError, Result};

/// Reserves `quantity` units inside `tx`. Fails closed: stock never goes negative.
pub async fn reserve_in<T: StoreTx>(tx: &mut T, product_id: ProductId, quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(CheckoutError::Validation(
            "quantity must be greater than 0".to_string(),
        ));
    }
    tx.reserve_stock(product_id, quantity).await.map_err(|err| {
        if let StoreError::InsufficientStock { available, .. } = &err {
            metrics::counter!("checkout_insufficient_stock_total").increment(1);
            tracing::info!(%product_id, quantity, available, "reservation rejected");
        }
        CheckoutError::from(err)
    })
}

/// Returns `quantity` units to stock inside `tx`.
///
/// Releasing against an unknown product is an integrity error: it is logged
/// and surfaced, never retried.
pub async fn release_in<T: StoreTx>(tx: &mut T, product_id: ProductId, quantity: u32) -> Result<()> {
    match tx.release_stock(product_id, quantity).await {
        Ok(()) => Ok(()),
        Err(StoreError::ProductNotFound(_)) => {
            tracing::error!(%product_id, quantity, "release for unknown product");
            Err(CheckoutError::Store(StoreError::Integrity(format!(
                "cannot release {quantity} units of unknown product {product_id}"
            ))))
        }
        Err(err) => Err(err.into()),
    }
}

/// Releases every `(product, quantity)` pair inside `tx`.
pub async fn release_all<T: StoreTx>(tx: &mut T, lines: &[(ProductId, u32)]) -> Result<()> {
    for &(product_id, quantity) in lines {
        release_in(tx, product_id, quantity).await?;
    }
    Ok(())
}

/// Standalone ledger operations, one transaction each.
#[derive(Clone)]
pub struct InventoryLedger<S: Store> {
    store: S,
}

impl<S: Store> InventoryLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, product_id: ProductId, quantity: u32) -> Result<()> {
        let mut tx = self.store.begin().await?;
        reserve_in(&mut tx, product_id, quantity).await?;
        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn release(&self, product_id: ProductId, quantity: u32) -> Result<()> {
        let mut tx = self.store.begin().await?;
        release_in(&mut tx, product_id, quantity).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn product(&self, product_id: ProductId) -> Result<Product> {
        let mut tx = self.store.begin().await?;
        tx.product(product_id)
            .await?
            .ok_or(CheckoutError::ProductNotFound(product_id))
    }

    /// Creates or replaces a catalog product (admin).
    #[tracing::instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn upsert_product(&self, product: &Product) -> Result<()> {
        let mut tx = self.store.begin().await?;
        tx.upsert_product(product).await?;
        tx.commit().await?;
        tracing::info!(stock = product.stock, "product upserted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Money;
    use store::InMemoryStore;

    async fn setup(stock: u32) -> (InventoryLedger<InMemoryStore>, InMemoryStore, ProductId) {
        let store = InMemoryStore::new();
        let ledger = InventoryLedger::new(store.clone());
        let product = Product::new(ProductId::new(), "Lamp", Money::from_cents(4000), stock).unwrap();
        ledger.upsert_product(&product).await.unwrap();
        (ledger, store, product.id)
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let (ledger, store, product_id) = setup(3).await;

        ledger.reserve(product_id, 2).await.unwrap();
        assert_eq!(store.stock(product_id).await, Some(1));

        let err = ledger.reserve(product_id, 2).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InsufficientStock(id) if id == product_id));
        assert_eq!(store.stock(product_id).await, Some(1));

        ledger.release(product_id, 2).await.unwrap();
        assert_eq!(store.stock(product_id).await, Some(3));
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let (ledger, _, product_id) = setup(3).await;
        assert!(matches!(
            ledger.reserve(product_id, 0).await,
            Err(CheckoutError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_release_unknown_product_is_integrity_error() {
        let (ledger, _, _) = setup(3).await;
        let err = ledger.release(ProductId::new(), 1).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Store(StoreError::Integrity(_))));
    }

    #[tokio::test]
    async fn test_concurrent_reservations_do_not_oversell() {
        let (ledger, store, product_id) = setup(5).await;

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.reserve(product_id, 1).await })
            })
            .collect();

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 5);
        assert_eq!(store.stock(product_id).await, Some(0));
    }
}
