//! Order aggregate: line snapshots, the frozen total, and the status lifecycle.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::payment::PaymentMethod;
use crate::value_objects::Money;

use super::{OrderStatus, OrderStatusChange};

/// A purchased product, frozen at the name and price in effect at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

impl OrderLine {
    /// Creates a line snapshot, computing its total.
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Result<Self, DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity(quantity));
        }
        if !unit_price.is_positive() {
            return Err(DomainError::InvalidPrice(unit_price.cents()));
        }
        Ok(Self {
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
            line_total: unit_price.checked_mul(quantity)?,
        })
    }
}

/// Customer-supplied checkout details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutDetails {
    pub shipping_address: String,
    /// Falls back to the shipping address when absent or blank.
    pub billing_address: Option<String>,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

impl CheckoutDetails {
    /// Creates checkout details with only the required fields.
    pub fn new(shipping_address: impl Into<String>, payment_method: PaymentMethod) -> Self {
        Self {
            shipping_address: shipping_address.into(),
            billing_address: None,
            payment_method,
            notes: None,
        }
    }
}

/// Every persisted field of an order, used to rehydrate it from storage.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub id: OrderId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub total: Money,
    pub status: OrderStatus,
    pub payment_reference: Option<String>,
    pub tracking_id: Option<String>,
    pub payment_method: PaymentMethod,
    pub shipping_address: String,
    pub billing_address: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An order placed from a cart.
///
/// Only the status, the provider payment reference, the shipment tracking id
/// and the update timestamp change after creation; the lines and the total
/// are fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    lines: Vec<OrderLine>,
    total: Money,
    status: OrderStatus,
    payment_reference: Option<String>,
    tracking_id: Option<String>,
    payment_method: PaymentMethod,
    shipping_address: String,
    billing_address: String,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Places a new `pending` order. The total is computed here, once.
    pub fn place(
        user_id: UserId,
        lines: Vec<OrderLine>,
        details: CheckoutDetails,
    ) -> Result<Self, DomainError> {
        if lines.is_empty() {
            return Err(DomainError::NoLines);
        }
        let shipping_address = details.shipping_address.trim().to_string();
        if shipping_address.is_empty() {
            return Err(DomainError::MissingField("shippingAddress"));
        }
        let billing_address = details
            .billing_address
            .map(|addr| addr.trim().to_string())
            .filter(|addr| !addr.is_empty())
            .unwrap_or_else(|| shipping_address.clone());
        let notes = details.notes.filter(|n| !n.trim().is_empty());

        let total = Money::try_sum(lines.iter().map(|line| line.line_total))?;
        let now = Utc::now();

        Ok(Self {
            id: OrderId::new(),
            user_id,
            lines,
            total,
            status: OrderStatus::Pending,
            payment_reference: None,
            tracking_id: None,
            payment_method: details.payment_method,
            shipping_address,
            billing_address,
            notes,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rehydrates an order from storage without recomputing anything.
    pub fn restore(record: OrderRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            lines: record.lines,
            total: record.total,
            status: record.status,
            payment_reference: record.payment_reference,
            tracking_id: record.tracking_id,
            payment_method: record.payment_method,
            shipping_address: record.shipping_address,
            billing_address: record.billing_address,
            notes: record.notes,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    /// Moves the order along the lifecycle, rejecting edges the graph lacks.
    ///
    /// Returns the change for the order's status history.
    pub fn transition(&mut self, next: OrderStatus) -> Result<OrderStatusChange, DomainError> {
        let previous = self.status;
        self.status = previous.transition(next)?;
        self.updated_at = Utc::now();
        Ok(OrderStatusChange::new(self.id, Some(previous), next))
    }

    /// The history entry recording that the order was placed.
    pub fn placed(&self) -> OrderStatusChange {
        OrderStatusChange {
            changed_at: self.created_at,
            ..OrderStatusChange::new(self.id, None, self.status)
        }
    }

    /// Records the carrier tracking id. Only shipped orders carry one.
    pub fn set_tracking_id(&mut self, tracking_id: impl Into<String>) -> Result<(), DomainError> {
        if self.status != OrderStatus::Shipped {
            return Err(DomainError::TrackingRequiresShipment(self.status));
        }
        let tracking_id = tracking_id.into().trim().to_string();
        if tracking_id.is_empty() {
            return Err(DomainError::MissingField("trackingId"));
        }
        self.tracking_id = Some(tracking_id);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Records the provider reference of the payment currently driving the order.
    pub fn set_payment_reference(&mut self, reference: impl Into<String>) {
        self.payment_reference = Some(reference.into());
        self.updated_at = Utc::now();
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_reference(&self) -> Option<&str> {
        self.payment_reference.as_deref()
    }

    pub fn tracking_id(&self) -> Option<&str> {
        self.tracking_id.as_deref()
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn shipping_address(&self) -> &str {
        &self.shipping_address
    }

    pub fn billing_address(&self) -> &str {
        &self.billing_address
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if `user_id` placed this order.
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}
