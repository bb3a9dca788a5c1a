use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use thiserror::Error;

use crate::models::item::Item;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("row rejected: {0}")]
    Rejected(String),
}

/// Idempotent item persistence keyed by `Item::id`.
///
/// Upserts overwrite title, body, updated_at, content_type and synced_at;
/// keep existing tags unless the incoming list is non-empty; and only move
/// moderation status forward out of `pending`.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// One set-based statement for the whole slice; all or nothing.
    async fn upsert_batch(&self, items: &[Item]) -> Result<(), StoreError>;

    async fn upsert_one(&self, item: &Item) -> Result<(), StoreError>;

    async fn max_synced_at(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
}

const UPSERT_ITEMS_SQL: &str = r#"
INSERT INTO items
    (id, title, body, url, created_at, updated_at, author_username, source_repo,
     content_type, moderation_status, tags, synced_at)
SELECT r.id, r.title, r.body, r.url, r.created_at, r.updated_at, r.author_username,
       r.source_repo, r.content_type, r.moderation_status,
       ARRAY(SELECT jsonb_array_elements_text(r.tags)),
       r.synced_at
FROM UNNEST(
    $1::text[], $2::text[], $3::text[], $4::text[], $5::timestamptz[], $6::timestamptz[],
    $7::text[], $8::text[], $9::text[], $10::text[], $11::jsonb[], $12::timestamptz[]
) AS r(id, title, body, url, created_at, updated_at, author_username, source_repo,
       content_type, moderation_status, tags, synced_at)
ON CONFLICT (id) DO UPDATE SET
    title = EXCLUDED.title,
    body = EXCLUDED.body,
    updated_at = EXCLUDED.updated_at,
    content_type = EXCLUDED.content_type,
    synced_at = EXCLUDED.synced_at,
    tags = CASE
        WHEN cardinality(EXCLUDED.tags) > 0 THEN EXCLUDED.tags
        ELSE items.tags
    END,
    moderation_status = CASE
        WHEN items.moderation_status = 'pending' THEN EXCLUDED.moderation_status
        ELSE items.moderation_status
    END
"#;

/// Column-major view of a slice of items, one array per bound parameter.
struct ItemColumns {
    ids: Vec<String>,
    titles: Vec<String>,
    bodies: Vec<String>,
    urls: Vec<String>,
    created_at: Vec<DateTime<Utc>>,
    updated_at: Vec<DateTime<Utc>>,
    authors: Vec<String>,
    source_repos: Vec<String>,
    content_types: Vec<String>,
    statuses: Vec<String>,
    tags: Vec<Json<Vec<String>>>,
    synced_at: Vec<DateTime<Utc>>,
}

impl ItemColumns {
    fn from_items(items: &[Item]) -> Self {
        let mut cols = ItemColumns {
            ids: Vec::with_capacity(items.len()),
            titles: Vec::with_capacity(items.len()),
            bodies: Vec::with_capacity(items.len()),
            urls: Vec::with_capacity(items.len()),
            created_at: Vec::with_capacity(items.len()),
            updated_at: Vec::with_capacity(items.len()),
            authors: Vec::with_capacity(items.len()),
            source_repos: Vec::with_capacity(items.len()),
            content_types: Vec::with_capacity(items.len()),
            statuses: Vec::with_capacity(items.len()),
            tags: Vec::with_capacity(items.len()),
            synced_at: Vec::with_capacity(items.len()),
        };
        for item in items {
            cols.ids.push(item.id.clone());
            cols.titles.push(item.title.clone());
            cols.bodies.push(item.body.clone());
            cols.urls.push(item.url.clone());
            cols.created_at.push(item.created_at);
            cols.updated_at.push(item.updated_at);
            cols.authors.push(item.author_username.clone());
            cols.source_repos.push(item.source_repo.clone());
            cols.content_types.push(item.content_type.as_str().to_string());
            cols.statuses.push(item.moderation_status.as_str().to_string());
            cols.tags.push(Json(item.tags.clone()));
            cols.synced_at.push(item.synced_at);
        }
        cols
    }
}

#[derive(Clone)]
pub struct PgItemStore {
    pool: PgPool,
}

impl PgItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert(&self, items: &[Item]) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        let cols = ItemColumns::from_items(items);
        sqlx::query(UPSERT_ITEMS_SQL)
            .bind(&cols.ids)
            .bind(&cols.titles)
            .bind(&cols.bodies)
            .bind(&cols.urls)
            .bind(&cols.created_at)
            .bind(&cols.updated_at)
            .bind(&cols.authors)
            .bind(&cols.source_repos)
            .bind(&cols.content_types)
            .bind(&cols.statuses)
            .bind(&cols.tags)
            .bind(&cols.synced_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ItemStore for PgItemStore {
    async fn upsert_batch(&self, items: &[Item]) -> Result<(), StoreError> {
        self.upsert(items).await
    }

    async fn upsert_one(&self, item: &Item) -> Result<(), StoreError> {
        self.upsert(std::slice::from_ref(item)).await
    }

    async fn max_synced_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(sqlx::query_scalar("SELECT MAX(synced_at) FROM items")
            .fetch_one(&self.pool)
            .await?)
    }
}
