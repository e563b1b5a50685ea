use common::UserId;
use domain::{Order, OrderStatus};

/// Page size used when a query sets no limit.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest page a single query may return.
pub const MAX_PAGE_SIZE: usize = 100;

/// Builder for listing orders across users.
///
/// Results are ordered by creation time, newest first unless
/// [`OrderQuery::oldest_first`] is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderQuery {
    /// Filter by current status.
    pub status: Option<OrderStatus>,

    /// Filter by owning user.
    pub user_id: Option<UserId>,

    /// Maximum number of orders to return. Clamped to `1..=MAX_PAGE_SIZE`.
    pub limit: Option<usize>,

    /// Number of orders to skip.
    pub offset: Option<usize>,

    /// Sort ascending by creation time instead of descending.
    pub oldest_first: bool,
}

impl OrderQuery {
    /// Creates a query matching every order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters by status.
    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filters by owning user.
    pub fn user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Limits the number of orders returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips this many orders before returning results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Sorts oldest first.
    pub fn oldest_first(mut self) -> Self {
        self.oldest_first = true;
        self
    }

    /// The limit actually applied.
    pub fn page_size(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    /// The offset actually applied.
    pub fn skip(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    /// Whether `order` passes the filters (paging aside).
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|s| order.status() == s)
            && self.user_id.is_none_or(|u| order.user_id() == u)
    }
}

/// One page of a listing plus the number of orders matching the filters.
#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
}
