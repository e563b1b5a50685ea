//! Catalog products as seen by checkout.

use chrono::{DateTime, Utc};
use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_objects::Money;

/// A sellable product with its current price and on-hand stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Creates an active product.
    pub fn new(
        id: ProductId,
        name: impl Into<String>,
        price: Money,
        stock: u32,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::MissingField("name"));
        }
        if !price.is_positive() {
            return Err(DomainError::InvalidPrice(price.cents()));
        }
        Ok(Self {
            id,
            name,
            price,
            stock,
            active: true,
            updated_at: Utc::now(),
        })
    }

    /// Returns true if the product can currently be sold in `quantity` units.
    pub fn can_supply(&self, quantity: u32) -> bool {
        self.active && self.stock >= quantity
    }
}
