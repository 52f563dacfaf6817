//! Inbound `entity-created` messages.
//!
//! - `handler`: decode → forward to `EntityService` → decide whether to ack
//! - `publisher`: the producing side of the same topic

pub mod handler;
pub mod publisher;

pub use handler::{DecodeError, EntityCreatedHandler, EntityCreatedPayload, IngestOutcome};
pub use publisher::{EntityCreatedPublisher, PublishError};
