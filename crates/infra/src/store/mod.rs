//! Entity persistence.
//!
//! The store is the only component touching durable state. Each operation is
//! atomic for a single record; nothing here composes operations into
//! cross-record transactions.

mod in_memory;
mod postgres;
mod r#trait;

pub use in_memory::InMemoryEntityStore;
pub use postgres::PostgresEntityStore;
pub use r#trait::{EntityStore, StoreError};
