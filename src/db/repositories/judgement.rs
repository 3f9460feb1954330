//! Judgement repository
//!
//! `apply` reads the user's current judgement, writes the resolved one and
//! moves the target's like/dislike counters in a single transaction.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use super::decrement_expr;
use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Judgement, JudgementTarget, TargetType};

/// Outcome of applying a judgement request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JudgementChange {
    pub previous: Option<Judgement>,
    pub current: Option<Judgement>,
}

impl JudgementChange {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

#[async_trait]
pub trait JudgementRepository: Send + Sync {
    async fn get(&self, target: JudgementTarget, user_id: i64) -> Result<Option<Judgement>>;

    /// Resolve and persist a judgement request atomically
    async fn apply(
        &self,
        target: JudgementTarget,
        user_id: i64,
        requested: Option<Judgement>,
    ) -> Result<JudgementChange>;

    /// Current (likes, dislikes) of the target, None when it does not exist
    async fn counters(&self, target: JudgementTarget) -> Result<Option<(i64, i64)>>;

    /// The user's judgements on every comment of an article, keyed by comment id
    async fn for_article_comments(
        &self,
        article_id: i64,
        user_id: i64,
    ) -> Result<HashMap<i64, Judgement>>;

    /// Remove every judgement a user made, taking them off the counters.
    /// Returns the number of judgements removed.
    async fn retract_all_by_user(&self, user_id: i64) -> Result<u64>;
}

pub struct SqlxJudgementRepository {
    pool: DynDatabasePool,
}

impl SqlxJudgementRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn JudgementRepository> {
        Arc::new(Self::new(pool))
    }
}

const SELECT_JUDGEMENT: &str =
    "SELECT value FROM judgements WHERE target_type = ? AND target_id = ? AND user_id = ?";
const INSERT_JUDGEMENT: &str = r#"
    INSERT INTO judgements (target_type, target_id, user_id, value, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;
const UPDATE_JUDGEMENT: &str = "UPDATE judgements SET value = ?, updated_at = ? WHERE target_type = ? AND target_id = ? AND user_id = ?";
const DELETE_JUDGEMENT: &str =
    "DELETE FROM judgements WHERE target_type = ? AND target_id = ? AND user_id = ?";
const COMMENT_JUDGEMENTS: &str = r#"
    SELECT j.target_id, j.value
    FROM judgements j
    INNER JOIN comments c ON c.id = j.target_id
    WHERE j.target_type = 'comment' AND c.article_id = ? AND j.user_id = ?
"#;

const DELETE_USER_JUDGEMENTS: &str = "DELETE FROM judgements WHERE user_id = ?";

const RETRACT_TARGETS: [(TargetType, Judgement); 4] = [
    (TargetType::Article, Judgement::Like),
    (TargetType::Article, Judgement::Dislike),
    (TargetType::Comment, Judgement::Like),
    (TargetType::Comment, Judgement::Dislike),
];

fn parse_value(raw: &str) -> Result<Judgement> {
    Judgement::from_str(raw).with_context(|| format!("Invalid judgement in database: {}", raw))
}

fn increment_sql(target: JudgementTarget, value: Judgement) -> String {
    let column = value.counter_column();
    format!(
        "UPDATE {} SET {} = {} + 1 WHERE id = ?",
        target.target_type.table(),
        column,
        column
    )
}

fn decrement_sql(driver: DatabaseDriver, target: JudgementTarget, value: Judgement) -> String {
    let column = value.counter_column();
    format!(
        "UPDATE {} SET {} = {} WHERE id = ?",
        target.target_type.table(),
        column,
        decrement_expr(driver, column)
    )
}

/// Decrement one counter on every target the user judged with `value`
fn retract_sql(driver: DatabaseDriver, target_type: TargetType, value: Judgement) -> String {
    let column = value.counter_column();
    format!(
        "UPDATE {} SET {} = {} WHERE id IN \
         (SELECT target_id FROM judgements WHERE target_type = ? AND user_id = ? AND value = ?)",
        target_type.table(),
        column,
        decrement_expr(driver, column)
    )
}

#[async_trait]
impl JudgementRepository for SqlxJudgementRepository {
    async fn get(&self, target: JudgementTarget, user_id: i64) -> Result<Option<Judgement>> {
        let raw: Option<String> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(SELECT_JUDGEMENT)
                .bind(target.target_type.as_str())
                .bind(target.target_id)
                .bind(user_id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get judgement")?,
            DatabaseDriver::Mysql => sqlx::query_scalar(SELECT_JUDGEMENT)
                .bind(target.target_type.as_str())
                .bind(target.target_id)
                .bind(user_id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get judgement")?,
        };
        raw.as_deref().map(parse_value).transpose()
    }

    async fn apply(
        &self,
        target: JudgementTarget,
        user_id: i64,
        requested: Option<Judgement>,
    ) -> Result<JudgementChange> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                apply_sqlite(self.pool.sqlite()?, target, user_id, requested).await
            }
            DatabaseDriver::Mysql => {
                apply_mysql(self.pool.mysql()?, target, user_id, requested).await
            }
        }
    }

    async fn counters(&self, target: JudgementTarget) -> Result<Option<(i64, i64)>> {
        let sql = format!(
            "SELECT like_count, dislike_count FROM {} WHERE id = ?",
            target.target_type.table()
        );
        let counters = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(target.target_id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to read judgement counters")?
                .map(|row| (row.get("like_count"), row.get("dislike_count"))),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(target.target_id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to read judgement counters")?
                .map(|row| (row.get("like_count"), row.get("dislike_count"))),
        };
        Ok(counters)
    }

    async fn for_article_comments(
        &self,
        article_id: i64,
        user_id: i64,
    ) -> Result<HashMap<i64, Judgement>> {
        let pairs: Vec<(i64, String)> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(COMMENT_JUDGEMENTS)
                .bind(article_id)
                .bind(user_id)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to load comment judgements")?
                .iter()
                .map(|row| (row.get("target_id"), row.get("value")))
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(COMMENT_JUDGEMENTS)
                .bind(article_id)
                .bind(user_id)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to load comment judgements")?
                .iter()
                .map(|row| (row.get("target_id"), row.get("value")))
                .collect(),
        };

        pairs
            .into_iter()
            .map(|(id, raw)| Ok((id, parse_value(&raw)?)))
            .collect()
    }

    async fn retract_all_by_user(&self, user_id: i64) -> Result<u64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => retract_all_sqlite(self.pool.sqlite()?, user_id).await,
            DatabaseDriver::Mysql => retract_all_mysql(self.pool.mysql()?, user_id).await,
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn apply_sqlite(
    pool: &SqlitePool,
    target: JudgementTarget,
    user_id: i64,
    requested: Option<Judgement>,
) -> Result<JudgementChange> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let previous: Option<String> = sqlx::query_scalar(SELECT_JUDGEMENT)
        .bind(target.target_type.as_str())
        .bind(target.target_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to read judgement")?;
    let previous = previous.as_deref().map(parse_value).transpose()?;
    let current = Judgement::resolve(previous, requested);
    let change = JudgementChange { previous, current };

    if !change.changed() {
        return Ok(change);
    }

    let now = Utc::now();
    match (previous, current) {
        (None, Some(value)) => {
            sqlx::query(INSERT_JUDGEMENT)
                .bind(target.target_type.as_str())
                .bind(target.target_id)
                .bind(user_id)
                .bind(value.as_str())
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("Failed to insert judgement")?;
        }
        (Some(_), Some(value)) => {
            sqlx::query(UPDATE_JUDGEMENT)
                .bind(value.as_str())
                .bind(now)
                .bind(target.target_type.as_str())
                .bind(target.target_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .context("Failed to update judgement")?;
        }
        (Some(_), None) => {
            sqlx::query(DELETE_JUDGEMENT)
                .bind(target.target_type.as_str())
                .bind(target.target_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete judgement")?;
        }
        (None, None) => {}
    }

    if let Some(old) = previous {
        sqlx::query(&decrement_sql(DatabaseDriver::Sqlite, target, old))
            .bind(target.target_id)
            .execute(&mut *tx)
            .await
            .context("Failed to decrement judgement counter")?;
    }
    if let Some(new) = current {
        sqlx::query(&increment_sql(target, new))
            .bind(target.target_id)
            .execute(&mut *tx)
            .await
            .context("Failed to increment judgement counter")?;
    }

    tx.commit().await.context("Failed to commit judgement")?;
    Ok(change)
}

async fn retract_all_sqlite(pool: &SqlitePool, user_id: i64) -> Result<u64> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    for (target_type, value) in RETRACT_TARGETS {
        sqlx::query(&retract_sql(DatabaseDriver::Sqlite, target_type, value))
            .bind(target_type.as_str())
            .bind(user_id)
            .bind(value.as_str())
            .execute(&mut *tx)
            .await
            .context("Failed to retract judgement counters")?;
    }
    let removed = sqlx::query(DELETE_USER_JUDGEMENTS)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete user judgements")?
        .rows_affected();
    tx.commit().await.context("Failed to commit judgement retraction")?;
    Ok(removed)
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn apply_mysql(
    pool: &MySqlPool,
    target: JudgementTarget,
    user_id: i64,
    requested: Option<Judgement>,
) -> Result<JudgementChange> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let select = format!("{} FOR UPDATE", SELECT_JUDGEMENT);
    let previous: Option<String> = sqlx::query_scalar(&select)
        .bind(target.target_type.as_str())
        .bind(target.target_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to read judgement")?;
    let previous = previous.as_deref().map(parse_value).transpose()?;
    let current = Judgement::resolve(previous, requested);
    let change = JudgementChange { previous, current };

    if !change.changed() {
        return Ok(change);
    }

    let now = Utc::now();
    match (previous, current) {
        (None, Some(value)) => {
            sqlx::query(INSERT_JUDGEMENT)
                .bind(target.target_type.as_str())
                .bind(target.target_id)
                .bind(user_id)
                .bind(value.as_str())
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("Failed to insert judgement")?;
        }
        (Some(_), Some(value)) => {
            sqlx::query(UPDATE_JUDGEMENT)
                .bind(value.as_str())
                .bind(now)
                .bind(target.target_type.as_str())
                .bind(target.target_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .context("Failed to update judgement")?;
        }
        (Some(_), None) => {
            sqlx::query(DELETE_JUDGEMENT)
                .bind(target.target_type.as_str())
                .bind(target.target_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete judgement")?;
        }
        (None, None) => {}
    }

    if let Some(old) = previous {
        sqlx::query(&decrement_sql(DatabaseDriver::Mysql, target, old))
            .bind(target.target_id)
            .execute(&mut *tx)
            .await
            .context("Failed to decrement judgement counter")?;
    }
    if let Some(new) = current {
        sqlx::query(&increment_sql(target, new))
            .bind(target.target_id)
            .execute(&mut *tx)
            .await
            .context("Failed to increment judgement counter")?;
    }

    tx.commit().await.context("Failed to commit judgement")?;
    Ok(change)
}

async fn retract_all_mysql(pool: &MySqlPool, user_id: i64) -> Result<u64> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    for (target_type, value) in RETRACT_TARGETS {
        sqlx::query(&retract_sql(DatabaseDriver::Mysql, target_type, value))
            .bind(target_type.as_str())
            .bind(user_id)
            .bind(value.as_str())
            .execute(&mut *tx)
            .await
            .context("Failed to retract judgement counters")?;
    }
    let removed = sqlx::query(DELETE_USER_JUDGEMENTS)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete user judgements")?
        .rows_affected();
    tx.commit().await.context("Failed to commit judgement retraction")?;
    Ok(removed)
}
