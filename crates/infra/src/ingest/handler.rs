//! Stateless per-message pipeline for entity creation events.
//!
//! ```text
//! receive → decode ─┬─ fail → Malformed (log, ack: poison message is dropped)
//!                   └─ ok → create_with_id ─┬─ created   → Created   (ack)
//!                                           ├─ id exists → Duplicate (ack)
//!                                           ├─ invalid   → Rejected  (ack)
//!                                           └─ store err → Retry     (no ack)
//! ```
//!
//! The payload must carry a stable id. That id is what makes at-least-once
//! delivery safe: a redelivered message hits the existing record and becomes a
//! `Duplicate` instead of a second, divergent entity. No retries happen here;
//! leaving a message unacknowledged hands redelivery back to the channel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use ske_core::{Entity, EntityId, NewEntity};

use crate::entity_service::{EntityService, ServiceError};
use crate::store::EntityStore;

/// Body of an `entity-created` message: a serialized entity.
///
/// Only `id` and `title` are used. Timestamps, if present, are ignored because
/// the entity service owns them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCreatedPayload {
    pub id: EntityId,
    pub title: String,
}

impl From<&Entity> for EntityCreatedPayload {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id,
            title: entity.title.as_str().to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("malformed entity-created payload: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

impl EntityCreatedPayload {
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new entity was persisted.
    Created(EntityId),
    /// An entity with this id already exists; nothing was written.
    /// `conflicting` is true when the stored title differs from the payload.
    Duplicate { id: EntityId, conflicting: bool },
    /// The payload decoded but failed validation.
    Rejected { id: EntityId, reason: String },
    /// The payload could not be decoded.
    Malformed(String),
    /// Persistence failed; the message should be redelivered.
    Retry(String),
}

impl IngestOutcome {
    /// Everything except a transient store failure is final for this message.
    pub fn should_acknowledge(&self) -> bool {
        !matches!(self, IngestOutcome::Retry(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Created(_) => "created",
            IngestOutcome::Duplicate { .. } => "duplicate",
            IngestOutcome::Rejected { .. } => "rejected",
            IngestOutcome::Malformed(_) => "malformed",
            IngestOutcome::Retry(_) => "retry",
        }
    }
}

/// Forwards decoded creation events to the entity service.
#[derive(Debug)]
pub struct EntityCreatedHandler<S> {
    service: Arc<EntityService<S>>,
}

impl<S> Clone for EntityCreatedHandler<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

impl<S> EntityCreatedHandler<S>
where
    S: EntityStore,
{
    pub fn new(service: Arc<EntityService<S>>) -> Self {
        Self { service }
    }

    pub async fn handle(&self, payload: &[u8]) -> IngestOutcome {
        let event = match EntityCreatedPayload::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, payload_len = payload.len(), "dropping malformed entity-created message");
                return IngestOutcome::Malformed(e.to_string());
            }
        };

        let id = event.id;
        match self
            .service
            .create_with_id(id, NewEntity::new(event.title.clone()))
            .await
        {
            Ok(entity) => {
                info!(entity_id = %entity.id, "entity created from message");
                IngestOutcome::Created(entity.id)
            }
            Err(ServiceError::Conflict(_)) => self.duplicate(id, &event.title).await,
            Err(ServiceError::Validation(reason)) | Err(ServiceError::InvalidId(reason)) => {
                warn!(entity_id = %id, reason = %reason, "dropping invalid entity-created message");
                IngestOutcome::Rejected { id, reason }
            }
            Err(ServiceError::NotFound) => {
                // create never reports NotFound; treat it like a transient failure.
                IngestOutcome::Retry("unexpected not-found during create".to_string())
            }
            Err(ServiceError::Store(e)) => {
                error!(entity_id = %id, error = %e, "store failure while ingesting; leaving for redelivery");
                IngestOutcome::Retry(e.to_string())
            }
        }
    }

    async fn duplicate(&self, id: EntityId, title: &str) -> IngestOutcome {
        let conflicting = match self.service.get(id).await {
            Ok(existing) => existing.title.as_str() != title,
            // Deleted since the conflict, or unreadable: nothing to compare against.
            Err(_) => false,
        };

        if conflicting {
            warn!(entity_id = %id, "conflicting duplicate entity-created message; existing record kept");
        } else {
            info!(entity_id = %id, "duplicate entity-created message ignored");
        }
        IngestOutcome::Duplicate { id, conflicting }
    }
}
