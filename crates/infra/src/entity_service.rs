//! Entity lifecycle orchestration.
//!
//! `EntityService` is the single authority over validation and persistence:
//! both the REST facade and the ingestion handler go through it, and it is
//! the only writer of entity state. Each operation follows the same shape:
//!
//! ```text
//! input
//!   ↓
//! 1. Validate / merge (pure, in `ske-core`)
//!   ↓
//! 2. Persist through the injected `EntityStore`
//!   ↓
//! 3. Map store + domain failures into `ServiceError`
//! ```
//!
//! Absence is detected explicitly: updates read before writing, and writes
//! report whether a record was touched, so "not found" never depends on how a
//! particular backend phrases its errors.
//!
//! Concurrent updates of the same entity are not serialized here; the store's
//! per-record atomicity makes the effective policy last-write-wins.

use chrono::Utc;
use tracing::{debug, instrument};

use ske_core::{DomainError, Entity, EntityId, EntityUpdate, NewEntity, Pagination};

use crate::store::{EntityStore, StoreError};

/// Failure of an entity service operation (transport-agnostic).
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Input failed validation (e.g. empty title).
    #[error("validation failed: {0}")]
    Validation(String),
    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
    /// No entity with the requested id.
    #[error("entity not found")]
    NotFound,
    /// An entity with the requested id already exists.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Persistence failed.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => Self::Validation(msg),
            DomainError::InvalidId(msg) => Self::InvalidId(msg),
            DomainError::NotFound => Self::NotFound,
            DomainError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(id) => Self::Conflict(format!("entity {id} already exists")),
            other => Self::Store(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityService<S> {
    store: S,
}

impl<S> EntityService<S>
where
    S: EntityStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create an entity with a server-assigned id.
    #[instrument(skip(self, input), err)]
    pub async fn create(&self, input: NewEntity) -> Result<Entity, ServiceError> {
        self.create_with_id(EntityId::new(), input).await
    }

    /// Create an entity under a caller-supplied stable id.
    ///
    /// Fails with [`ServiceError::Conflict`] if the id is already taken; the
    /// existing record is left untouched.
    #[instrument(skip(self, input), fields(entity_id = %id), err)]
    pub async fn create_with_id(&self, id: EntityId, input: NewEntity) -> Result<Entity, ServiceError> {
        let entity = Entity::create(id, input, Utc::now())?;
        let created = self.store.insert(entity).await?;
        debug!(entity_id = %created.id, "entity created");
        Ok(created)
    }

    #[instrument(skip(self), fields(entity_id = %id), err)]
    pub async fn get(&self, id: EntityId) -> Result<Entity, ServiceError> {
        self.store.find_by_id(id).await?.ok_or(ServiceError::NotFound)
    }

    /// Entities ordered by `updated_at` descending. Never fails for "no rows":
    /// an empty page is an empty vector.
    #[instrument(skip(self), err)]
    pub async fn list(&self, pagination: Pagination) -> Result<Vec<Entity>, ServiceError> {
        if pagination.limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .scan_by_updated_desc(pagination.offset, pagination.limit)
            .await?)
    }

    /// Merge `patch` into the stored entity.
    ///
    /// Present fields are validated and overwritten, absent fields are left
    /// alone, and `updated_at` always advances. A validation failure leaves the
    /// stored record untouched.
    #[instrument(skip(self, patch), fields(entity_id = %id), err)]
    pub async fn update(&self, id: EntityId, patch: EntityUpdate) -> Result<Entity, ServiceError> {
        let current = self.get(id).await?;
        let merged = current.merge(&patch, Utc::now())?;

        // The record can vanish between the read and the write (concurrent delete).
        if !self.store.update_full(&merged).await? {
            return Err(ServiceError::NotFound);
        }

        debug!(entity_id = %id, "entity updated");
        Ok(merged)
    }

    /// Hard delete. Deleting an id that does not exist (including one that was
    /// already deleted) reports [`ServiceError::NotFound`].
    #[instrument(skip(self), fields(entity_id = %id), err)]
    pub async fn delete(&self, id: EntityId) -> Result<(), ServiceError> {
        if !self.store.delete_by_id(id).await? {
            return Err(ServiceError::NotFound);
        }
        debug!(entity_id = %id, "entity deleted");
        Ok(())
    }
}
