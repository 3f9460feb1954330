//! Article metadata repository
//!
//! Rows are created on first access (`ensure`) since articles themselves live
//! on disk, not in the database.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{ArticleMetadata, ContentKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

const METADATA_COLUMNS: &str = "id, kind, slug, view_count, like_count, dislike_count, comment_count, created_at, updated_at";

#[async_trait]
pub trait ArticleMetadataRepository: Send + Sync {
    /// Fetch the row for a document, creating it with zeroed counters if absent
    async fn ensure(&self, kind: ContentKind, slug: &str) -> Result<ArticleMetadata>;

    async fn get_by_id(&self, id: i64) -> Result<Option<ArticleMetadata>>;

    async fn get_by_slug(&self, kind: ContentKind, slug: &str) -> Result<Option<ArticleMetadata>>;

    /// Every row of one kind, or all rows
    async fn list(&self, kind: Option<ContentKind>) -> Result<Vec<ArticleMetadata>>;

    /// Bump the view counter, returning the new value (None if no such row)
    async fn increment_views(&self, id: i64) -> Result<Option<i64>>;
}

pub struct SqlxArticleMetadataRepository {
    pool: DynDatabasePool,
}

impl SqlxArticleMetadataRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ArticleMetadataRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ArticleMetadataRepository for SqlxArticleMetadataRepository {
    async fn ensure(&self, kind: ContentKind, slug: &str) -> Result<ArticleMetadata> {
        if let Some(existing) = self.get_by_slug(kind, slug).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(
                    "INSERT OR IGNORE INTO article_metadata (kind, slug, created_at, updated_at) VALUES (?, ?, ?, ?)",
                )
                .bind(kind.as_str())
                .bind(slug)
                .bind(now)
                .bind(now)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to create article metadata")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(
                    "INSERT IGNORE INTO article_metadata (kind, slug, created_at, updated_at) VALUES (?, ?, ?, ?)",
                )
                .bind(kind.as_str())
                .bind(slug)
                .bind(now)
                .bind(now)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to create article metadata")?;
            }
        }

        self.get_by_slug(kind, slug)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Article metadata missing after insert: {}/{}", kind, slug))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ArticleMetadata>> {
        let sql = format!("SELECT {} FROM article_metadata WHERE id = ?", METADATA_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.sqlite()?)
                    .await
                    .context("Failed to get article metadata by ID")?;
                row.as_ref().map(row_to_metadata_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.mysql()?)
                    .await
                    .context("Failed to get article metadata by ID")?;
                row.as_ref().map(row_to_metadata_mysql).transpose()
            }
        }
    }

    async fn get_by_slug(&self, kind: ContentKind, slug: &str) -> Result<Option<ArticleMetadata>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_by_slug_sqlite(self.pool.sqlite()?, kind, slug).await,
            DatabaseDriver::Mysql => get_by_slug_mysql(self.pool.mysql()?, kind, slug).await,
        }
    }

    async fn list(&self, kind: Option<ContentKind>) -> Result<Vec<ArticleMetadata>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_metadata_sqlite(self.pool.sqlite()?, kind).await,
            DatabaseDriver::Mysql => list_metadata_mysql(self.pool.mysql()?, kind).await,
        }
    }

    async fn increment_views(&self, id: i64) -> Result<Option<i64>> {
        let sql = "UPDATE article_metadata SET view_count = view_count + 1 WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to increment view count")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to increment view count")?
                .rows_affected(),
        };

        if affected == 0 {
            return Ok(None);
        }
        Ok(self.get_by_id(id).await?.map(|m| m.view_count))
    }
}

fn parse_kind(raw: &str) -> Result<ContentKind> {
    ContentKind::from_str(raw).with_context(|| format!("Invalid content kind in database: {}", raw))
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn get_by_slug_sqlite(
    pool: &SqlitePool,
    kind: ContentKind,
    slug: &str,
) -> Result<Option<ArticleMetadata>> {
    let sql = format!(
        "SELECT {} FROM article_metadata WHERE kind = ? AND slug = ?",
        METADATA_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(kind.as_str())
        .bind(slug)
        .fetch_optional(pool)
        .await
        .context("Failed to get article metadata by slug")?;

    row.as_ref().map(row_to_metadata_sqlite).transpose()
}

async fn list_metadata_sqlite(
    pool: &SqlitePool,
    kind: Option<ContentKind>,
) -> Result<Vec<ArticleMetadata>> {
    let rows = match kind {
        Some(kind) => {
            let sql = format!("SELECT {} FROM article_metadata WHERE kind = ?", METADATA_COLUMNS);
            sqlx::query(&sql).bind(kind.as_str()).fetch_all(pool).await
        }
        None => {
            let sql = format!("SELECT {} FROM article_metadata", METADATA_COLUMNS);
            sqlx::query(&sql).fetch_all(pool).await
        }
    }
    .context("Failed to list article metadata")?;

    rows.iter().map(row_to_metadata_sqlite).collect()
}

fn row_to_metadata_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<ArticleMetadata> {
    let kind: String = row.get("kind");
    Ok(ArticleMetadata {
        id: row.get("id"),
        kind: parse_kind(&kind)?,
        slug: row.get("slug"),
        view_count: row.get("view_count"),
        like_count: row.get("like_count"),
        dislike_count: row.get("dislike_count"),
        comment_count: row.get("comment_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn get_by_slug_mysql(
    pool: &MySqlPool,
    kind: ContentKind,
    slug: &str,
) -> Result<Option<ArticleMetadata>> {
    let sql = format!(
        "SELECT {} FROM article_metadata WHERE kind = ? AND slug = ?",
        METADATA_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(kind.as_str())
        .bind(slug)
        .fetch_optional(pool)
        .await
        .context("Failed to get article metadata by slug")?;

    row.as_ref().map(row_to_metadata_mysql).transpose()
}

async fn list_metadata_mysql(
    pool: &MySqlPool,
    kind: Option<ContentKind>,
) -> Result<Vec<ArticleMetadata>> {
    let rows = match kind {
        Some(kind) => {
            let sql = format!("SELECT {} FROM article_metadata WHERE kind = ?", METADATA_COLUMNS);
            sqlx::query(&sql).bind(kind.as_str()).fetch_all(pool).await
        }
        None => {
            let sql = format!("SELECT {} FROM article_metadata", METADATA_COLUMNS);
            sqlx::query(&sql).fetch_all(pool).await
        }
    }
    .context("Failed to list article metadata")?;

    rows.iter().map(row_to_metadata_mysql).collect()
}

fn row_to_metadata_mysql(row: &sqlx::mysql::MySqlRow) -> Result<ArticleMetadata> {
    let kind: String = row.get("kind");
    Ok(ArticleMetadata {
        id: row.get("id"),
        kind: parse_kind(&kind)?,
        slug: row.get("slug"),
        view_count: row.get("view_count"),
        like_count: row.get("like_count"),
        dislike_count: row.get("dislike_count"),
        comment_count: row.get("comment_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
