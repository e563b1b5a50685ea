//! Pre-checkout cart lines.

use chrono::{DateTime, Utc};
use common::{CartLineId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_objects::Money;

/// One product in a user's cart. The price is a snapshot taken when the
/// product was first added; checkout re-reads the catalog price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub id: CartLineId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartLine {
    pub fn new(
        user_id: UserId,
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: CartLineId::new(),
            user_id,
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn line_total(&self) -> Result<Money, DomainError> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// A cart with its derived totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub lines: Vec<CartLine>,
    pub total: Money,
    pub item_count: u64,
}

impl CartView {
    /// Builds the view, failing if the total does not fit in cents.
    pub fn new(lines: Vec<CartLine>) -> Result<Self, DomainError> {
        let line_totals = lines
            .iter()
            .map(CartLine::line_total)
            .collect::<Result<Vec<_>, _>>()?;
        let total = Money::try_sum(line_totals)?;
        let item_count = lines.iter().map(|l| u64::from(l.quantity)).sum();
        Ok(Self {
            lines,
            total,
            item_count,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
