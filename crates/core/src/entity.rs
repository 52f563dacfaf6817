//! The managed resource: identity + continuity across state changes.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainResult;
use crate::id::EntityId;
use crate::patch::EntityUpdate;
use crate::value_object::Title;

/// Input for creating an entity.
///
/// The title is validated when the entity is constructed, not here, so a
/// creation request with an empty title can be reported as a validation
/// failure rather than a decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntity {
    pub title: String,
}

impl NewEntity {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

/// A persisted entity.
///
/// Invariants:
/// - `title` is never empty (enforced by [`Title`]).
/// - `id` never changes after creation.
/// - `updated_at` strictly increases on every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub title: Title,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Build a brand-new entity stamped with `now`.
    pub fn create(id: EntityId, input: NewEntity, now: DateTime<Utc>) -> DomainResult<Self> {
        let title = Title::parse(input.title)?;
        let now = normalize_timestamp(now);
        Ok(Self {
            id,
            title,
            created_at: now,
            updated_at: now,
        })
    }

    /// Merge a patch into this entity, producing the next state.
    ///
    /// Every field present in the patch is validated before anything is
    /// applied; absent fields keep their current value. `updated_at` always
    /// advances, even for an empty patch.
    pub fn merge(&self, patch: &EntityUpdate, now: DateTime<Utc>) -> DomainResult<Self> {
        let title = match &patch.title {
            Some(raw) => Title::parse(raw.clone())?,
            None => self.title.clone(),
        };

        Ok(Self {
            id: self.id,
            title,
            created_at: self.created_at,
            updated_at: next_updated_at(self.updated_at, now),
        })
    }
}

/// Timestamps are kept at microsecond precision so every store backend
/// round-trips them exactly.
pub fn normalize_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// The `updated_at` to stamp on a mutation: `now`, unless the clock has not
/// moved past `previous`, in which case one microsecond after `previous`.
pub fn next_updated_at(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = normalize_timestamp(now);
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}
