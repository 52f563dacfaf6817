//! Postgres-backed entity store.
//!
//! Maps to a single `entities` table:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS entities (
//!     id          UUID PRIMARY KEY,
//!     title       TEXT NOT NULL CHECK (length(title) > 0),
//!     created_at  TIMESTAMPTZ NOT NULL,
//!     updated_at  TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX IF NOT EXISTS entities_updated_at_idx ON entities (updated_at DESC, id DESC);
//! ```
//!
//! ## Thread Safety
//!
//! Uses the SQLx connection pool which is `Send + Sync`; every operation is a
//! single statement, so each is atomic on its own.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use ske_core::{Entity, EntityId, Title};

use super::r#trait::{EntityStore, StoreError};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id          UUID PRIMARY KEY,
    title       TEXT NOT NULL CHECK (length(title) > 0),
    created_at  TIMESTAMPTZ NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL
)
"#;

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS entities_updated_at_idx ON entities (updated_at DESC, id DESC)";

#[derive(Debug, Clone)]
pub struct PostgresEntityStore {
    pool: Arc<PgPool>,
}

impl PostgresEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and make sure the `entities` table exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.ensure_table().await?;
        Ok(store)
    }

    /// Create the `entities` table and its scan index if missing.
    pub async fn ensure_table(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_table", e))?;
        sqlx::query(CREATE_INDEX)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_index", e))?;
        Ok(())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("{operation}: {err}"))
}

fn entity_from_row(row: &PgRow) -> Result<Entity, StoreError> {
    let corrupt = |field: &str, e: sqlx::Error| StoreError::Corrupt(format!("{field}: {e}"));

    let id: uuid::Uuid = row.try_get("id").map_err(|e| corrupt("id", e))?;
    let title: String = row.try_get("title").map_err(|e| corrupt("title", e))?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(|e| corrupt("created_at", e))?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(|e| corrupt("updated_at", e))?;

    let title = Title::parse(title)
        .map_err(|e| StoreError::Corrupt(format!("entity {id}: {e}")))?;

    Ok(Entity {
        id: EntityId::from_uuid(id),
        title,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    #[instrument(skip(self), fields(entity_id = %id), err)]
    async fn find_by_id(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, created_at, updated_at
            FROM entities
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_id", e))?;

        row.as_ref().map(entity_from_row).transpose()
    }

    #[instrument(skip(self, entity), fields(entity_id = %entity.id), err)]
    async fn insert(&self, entity: Entity) -> Result<Entity, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO entities (id, title, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(entity.id.as_uuid())
        .bind(entity.title.as_str())
        .bind(entity.created_at)
        .bind(entity.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(entity.id));
        }
        Ok(entity)
    }

    #[instrument(skip(self, entity), fields(entity_id = %entity.id), err)]
    async fn update_full(&self, entity: &Entity) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE entities
            SET title = $2, created_at = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(entity.id.as_uuid())
        .bind(entity.title.as_str())
        .bind(entity.created_at)
        .bind(entity.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_full", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(entity_id = %id), err)]
    async fn delete_by_id(&self, id: EntityId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM entities WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_by_id", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn scan_by_updated_desc(&self, offset: u64, limit: u32) -> Result<Vec<Entity>, StoreError> {
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r#"
            SELECT id, title, created_at, updated_at
            FROM entities
            ORDER BY updated_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("scan_by_updated_desc", e))?;

        rows.iter().map(entity_from_row).collect()
    }
}
