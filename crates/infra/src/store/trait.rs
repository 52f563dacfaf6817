use std::sync::Arc;

use async_trait::async_trait;

use ske_core::{Entity, EntityId};

/// Persistence failure.
///
/// "Record not found" is deliberately *not* an error here: lookups return
/// `Option` and writes return whether a record was touched, so callers can
/// detect absence explicitly regardless of backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Insert of an id that is already present.
    #[error("entity already exists: {0}")]
    Conflict(EntityId),

    /// A stored row could not be turned back into a valid `Entity`.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The backend failed (connection, query, lock poisoning, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// CRUD primitives over persisted entities, keyed by id.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_by_id(&self, id: EntityId) -> Result<Option<Entity>, StoreError>;

    /// Insert a new record. Fails with [`StoreError::Conflict`] if the id is taken.
    async fn insert(&self, entity: Entity) -> Result<Entity, StoreError>;

    /// Replace an existing record. Returns `false` if there was no such record.
    async fn update_full(&self, entity: &Entity) -> Result<bool, StoreError>;

    /// Remove a record. Returns `false` if there was no such record.
    async fn delete_by_id(&self, id: EntityId) -> Result<bool, StoreError>;

    /// Page through records ordered by `updated_at` descending (ties by id
    /// descending).
    async fn scan_by_updated_desc(&self, offset: u64, limit: u32) -> Result<Vec<Entity>, StoreError>;
}

#[async_trait]
impl<S> EntityStore for Arc<S>
where
    S: EntityStore + ?Sized,
{
    async fn find_by_id(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        (**self).find_by_id(id).await
    }

    async fn insert(&self, entity: Entity) -> Result<Entity, StoreError> {
        (**self).insert(entity).await
    }

    async fn update_full(&self, entity: &Entity) -> Result<bool, StoreError> {
        (**self).update_full(entity).await
    }

    async fn delete_by_id(&self, id: EntityId) -> Result<bool, StoreError> {
        (**self).delete_by_id(id).await
    }

    async fn scan_by_updated_desc(&self, offset: u64, limit: u32) -> Result<Vec<Entity>, StoreError> {
        (**self).scan_by_updated_desc(offset, limit).await
    }
}
