use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::RwLock;

use async_trait::async_trait;

use ske_core::{Entity, EntityId};

use super::r#trait::{EntityStore, StoreError};

/// In-memory entity store.
///
/// Intended for tests/dev. Scans sort the whole map; not optimized for size.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    records: RwLock<HashMap<EntityId, Entity>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn find_by_id(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        let map = self.records.read().map_err(|_| poisoned())?;
        Ok(map.get(&id).cloned())
    }

    async fn insert(&self, entity: Entity) -> Result<Entity, StoreError> {
        let mut map = self.records.write().map_err(|_| poisoned())?;
        match map.entry(entity.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(entity.id)),
            Entry::Vacant(slot) => Ok(slot.insert(entity).clone()),
        }
    }

    async fn update_full(&self, entity: &Entity) -> Result<bool, StoreError> {
        let mut map = self.records.write().map_err(|_| poisoned())?;
        match map.get_mut(&entity.id) {
            Some(existing) => {
                *existing = entity.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_by_id(&self, id: EntityId) -> Result<bool, StoreError> {
        let mut map = self.records.write().map_err(|_| poisoned())?;
        Ok(map.remove(&id).is_some())
    }

    async fn scan_by_updated_desc(&self, offset: u64, limit: u32) -> Result<Vec<Entity>, StoreError> {
        let map = self.records.read().map_err(|_| poisoned())?;

        let mut all: Vec<&Entity> = map.values().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id)));

        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(all
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
