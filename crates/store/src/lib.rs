//! Transactional persistence for the checkout service.
//!
//! Every operation runs inside a short [`StoreTx`]; nothing is written until
//! [`StoreTx::commit`] succeeds, and dropping a transaction rolls it back.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use query::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, OrderPage, OrderQuery};
pub use store::{Store, StoreTx};
