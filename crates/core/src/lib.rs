//! `ske-core`: domain foundation for the entity service.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the `Entity` record, the partial-update merge, title validation and
//! pagination rules. Anything that performs IO lives in `ske-infra`.

pub mod entity;
pub mod error;
pub mod id;
pub mod pagination;
pub mod patch;
pub mod value_object;

pub use entity::{Entity, NewEntity};
pub use error::{DomainError, DomainResult};
pub use id::EntityId;
pub use pagination::{Pagination, PaginationPolicy};
pub use patch::EntityUpdate;
pub use value_object::Title;
