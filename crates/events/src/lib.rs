//! Message channel mechanics (transport-agnostic).
//!
//! - `bus`: the `MessageChannel` contract and `Subscription` handle
//! - `delivery`: the unit handed to consumers, carrying what is needed to ack
//! - `in_memory_bus`: at-least-once in-memory channel for tests/dev

pub mod bus;
pub mod delivery;
pub mod in_memory_bus;

pub use bus::{MessageChannel, Subscription};
pub use delivery::Delivery;
pub use in_memory_bus::{InMemoryChannel, InMemoryChannelError};

/// Topic carrying entity creation notifications.
pub const ENTITY_CREATED_TOPIC: &str = "entity-created";
