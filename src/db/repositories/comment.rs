//! Comment repository
//!
//! Inserting and hard-deleting comments also adjusts the parent's
//! `reply_count` and the article's `comment_count` inside the same
//! transaction, so counters always match the rows that exist.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

use super::decrement_expr;
use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{gravatar_url, Comment, CommentWithAuthor, ListParams, PublicUser, UserRole};

const COMMENT_COLUMNS: &str = "c.id, c.article_id, c.user_id, c.parent_id, c.depth, c.content, c.like_count, c.dislike_count, c.reply_count, c.is_deleted, c.is_edited, c.created_at, c.updated_at";

const AUTHOR_COLUMNS: &str = "u.username AS author_username, u.email AS author_email, u.display_name AS author_display_name, u.avatar AS author_avatar, u.role AS author_role";

const INSERT_COMMENT: &str = r#"
    INSERT INTO comments (article_id, user_id, parent_id, depth, content, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

const BUMP_REPLY_COUNT: &str = "UPDATE comments SET reply_count = reply_count + 1 WHERE id = ?";
const BUMP_COMMENT_COUNT: &str =
    "UPDATE article_metadata SET comment_count = comment_count + 1 WHERE id = ?";

/// A comment about to be inserted
#[derive(Debug, Clone)]
pub struct NewComment {
    pub article_id: i64,
    pub user_id: i64,
    pub parent_id: Option<i64>,
    pub depth: i64,
    pub content: String,
}

#[async_trait]
pub trait CommentRepository: Send + Sync {
    /// Insert a comment and bump the parent and article counters
    async fn create(&self, comment: &NewComment) -> Result<Comment>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Comment>>;

    /// All comments of an article with their authors, oldest first
    async fn list_by_article(&self, article_id: i64) -> Result<Vec<CommentWithAuthor>>;

    /// A user's visible comments, newest first
    async fn list_by_user(&self, user_id: i64, params: &ListParams) -> Result<(Vec<Comment>, i64)>;

    async fn count_by_user(&self, user_id: i64) -> Result<i64>;

    /// Replace the content and mark the comment as edited
    async fn update_content(&self, id: i64, content: &str) -> Result<Option<Comment>>;

    /// Blank the content and detach the author, keeping the row for its replies
    async fn soft_delete(&self, id: i64) -> Result<()>;

    /// Remove the row and its judgements, decrementing counters.
    /// Returns false when the comment did not exist.
    async fn hard_delete(&self, id: i64) -> Result<bool>;
}

pub struct SqlxCommentRepository {
    pool: DynDatabasePool,
}

impl SqlxCommentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CommentRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl CommentRepository for SqlxCommentRepository {
    async fn create(&self, comment: &NewComment) -> Result<Comment> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => create_sqlite(self.pool.sqlite()?, comment).await?,
            DatabaseDriver::Mysql => create_mysql(self.pool.mysql()?, comment).await?,
        };
        self.get_by_id(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Comment not found after insert"))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Comment>> {
        let sql = format!("SELECT {} FROM comments c WHERE c.id = ?", COMMENT_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.sqlite()?)
                    .await
                    .context("Failed to get comment by ID")?;
                Ok(row.as_ref().map(row_to_comment_sqlite))
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.mysql()?)
                    .await
                    .context("Failed to get comment by ID")?;
                Ok(row.as_ref().map(row_to_comment_mysql))
            }
        }
    }

    async fn list_by_article(&self, article_id: i64) -> Result<Vec<CommentWithAuthor>> {
        let sql = format!(
            r#"
            SELECT {}, {}
            FROM comments c
            LEFT JOIN users u ON u.id = c.user_id
            WHERE c.article_id = ?
            ORDER BY c.created_at ASC, c.id ASC
            "#,
            COMMENT_COLUMNS, AUTHOR_COLUMNS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(&sql)
                    .bind(article_id)
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to list comments for article")?;
                Ok(rows
                    .iter()
                    .map(|row| CommentWithAuthor {
                        comment: row_to_comment_sqlite(row),
                        author: author_from_sqlite(row),
                    })
                    .collect())
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(&sql)
                    .bind(article_id)
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to list comments for article")?;
                Ok(rows
                    .iter()
                    .map(|row| CommentWithAuthor {
                        comment: row_to_comment_mysql(row),
                        author: author_from_mysql(row),
                    })
                    .collect())
            }
        }
    }

    async fn list_by_user(&self, user_id: i64, params: &ListParams) -> Result<(Vec<Comment>, i64)> {
        let sql = format!(
            r#"
            SELECT {} FROM comments c
            WHERE c.user_id = ? AND c.is_deleted = FALSE
            ORDER BY c.created_at DESC, c.id DESC
            LIMIT ? OFFSET ?
            "#,
            COMMENT_COLUMNS
        );
        let comments = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(user_id)
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to list comments by user")?
                .iter()
                .map(row_to_comment_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(user_id)
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to list comments by user")?
                .iter()
                .map(row_to_comment_mysql)
                .collect(),
        };
        let total = self.count_by_user(user_id).await?;
        Ok((comments, total))
    }

    async fn count_by_user(&self, user_id: i64) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM comments WHERE user_id = ? AND is_deleted = FALSE";
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .bind(user_id)
                .fetch_one(self.pool.sqlite()?)
                .await
                .context("Failed to count comments by user")?,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .bind(user_id)
                .fetch_one(self.pool.mysql()?)
                .await
                .context("Failed to count comments by user")?,
        };
        Ok(count)
    }

    async fn update_content(&self, id: i64, content: &str) -> Result<Option<Comment>> {
        let sql = "UPDATE comments SET content = ?, is_edited = TRUE, updated_at = ? WHERE id = ?";
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(content)
                    .bind(now)
                    .bind(id)
                    .execute(self.pool.sqlite()?)
                    .await
                    .context("Failed to update comment")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(content)
                    .bind(now)
                    .bind(id)
                    .execute(self.pool.mysql()?)
                    .await
                    .context("Failed to update comment")?;
            }
        }
        self.get_by_id(id).await
    }

    async fn soft_delete(&self, id: i64) -> Result<()> {
        let sql = "UPDATE comments SET content = '', user_id = NULL, is_deleted = TRUE, updated_at = ? WHERE id = ?";
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(now)
                    .bind(id)
                    .execute(self.pool.sqlite()?)
                    .await
                    .context("Failed to soft-delete comment")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(now)
                    .bind(id)
                    .execute(self.pool.mysql()?)
                    .await
                    .context("Failed to soft-delete comment")?;
            }
        }
        Ok(())
    }

    async fn hard_delete(&self, id: i64) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => hard_delete_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => hard_delete_mysql(self.pool.mysql()?, id).await,
        }
    }
}

fn build_author(
    user_id: Option<i64>,
    username: Option<String>,
    email: Option<String>,
    display_name: Option<String>,
    avatar: Option<String>,
    role: Option<String>,
) -> Option<PublicUser> {
    let id = user_id?;
    let username = username?;
    let avatar = avatar
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| gravatar_url(email.as_deref().unwrap_or_default()));
    let role = role
        .and_then(|r| UserRole::from_str(&r).ok())
        .unwrap_or_default();

    Some(PublicUser {
        id,
        username,
        display_name,
        avatar,
        role,
    })
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_sqlite(pool: &SqlitePool, comment: &NewComment) -> Result<i64> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let id = sqlx::query(INSERT_COMMENT)
        .bind(comment.article_id)
        .bind(comment.user_id)
        .bind(comment.parent_id)
        .bind(comment.depth)
        .bind(&comment.content)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to create comment")?
        .last_insert_rowid();

    if let Some(parent_id) = comment.parent_id {
        sqlx::query(BUMP_REPLY_COUNT)
            .bind(parent_id)
            .execute(&mut *tx)
            .await
            .context("Failed to update reply count")?;
    }

    sqlx::query(BUMP_COMMENT_COUNT)
        .bind(comment.article_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update comment count")?;

    tx.commit().await.context("Failed to commit comment")?;
    Ok(id)
}

async fn hard_delete_sqlite(pool: &SqlitePool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let row = sqlx::query("SELECT article_id, parent_id FROM comments WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to load comment for deletion")?;
    let Some(row) = row else {
        return Ok(false);
    };
    let article_id: i64 = row.get("article_id");
    let parent_id: Option<i64> = row.get("parent_id");

    sqlx::query("DELETE FROM judgements WHERE target_type = 'comment' AND target_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete comment judgements")?;
    sqlx::query("DELETE FROM comments WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete comment")?;

    if let Some(parent_id) = parent_id {
        let sql = format!(
            "UPDATE comments SET reply_count = {} WHERE id = ?",
            decrement_expr(DatabaseDriver::Sqlite, "reply_count")
        );
        sqlx::query(&sql)
            .bind(parent_id)
            .execute(&mut *tx)
            .await
            .context("Failed to update reply count")?;
    }

    let sql = format!(
        "UPDATE article_metadata SET comment_count = {} WHERE id = ?",
        decrement_expr(DatabaseDriver::Sqlite, "comment_count")
    );
    sqlx::query(&sql)
        .bind(article_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update comment count")?;

    tx.commit().await.context("Failed to commit comment deletion")?;
    Ok(true)
}

fn row_to_comment_sqlite(row: &sqlx::sqlite::SqliteRow) -> Comment {
    Comment {
        id: row.get("id"),
        article_id: row.get("article_id"),
        user_id: row.get("user_id"),
        parent_id: row.get("parent_id"),
        depth: row.get("depth"),
        content: row.get("content"),
        like_count: row.get("like_count"),
        dislike_count: row.get("dislike_count"),
        reply_count: row.get("reply_count"),
        is_deleted: row.get("is_deleted"),
        is_edited: row.get("is_edited"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn author_from_sqlite(row: &sqlx::sqlite::SqliteRow) -> Option<PublicUser> {
    build_author(
        row.get("user_id"),
        row.get("author_username"),
        row.get("author_email"),
        row.get("author_display_name"),
        row.get("author_avatar"),
        row.get("author_role"),
    )
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_mysql(pool: &MySqlPool, comment: &NewComment) -> Result<i64> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let id = sqlx::query(INSERT_COMMENT)
        .bind(comment.article_id)
        .bind(comment.user_id)
        .bind(comment.parent_id)
        .bind(comment.depth)
        .bind(&comment.content)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to create comment")?
        .last_insert_id() as i64;

    if let Some(parent_id) = comment.parent_id {
        sqlx::query(BUMP_REPLY_COUNT)
            .bind(parent_id)
            .execute(&mut *tx)
            .await
            .context("Failed to update reply count")?;
    }

    sqlx::query(BUMP_COMMENT_COUNT)
        .bind(comment.article_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update comment count")?;

    tx.commit().await.context("Failed to commit comment")?;
    Ok(id)
}

async fn hard_delete_mysql(pool: &MySqlPool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let row = sqlx::query("SELECT article_id, parent_id FROM comments WHERE id = ? FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to load comment for deletion")?;
    let Some(row) = row else {
        return Ok(false);
    };
    let article_id: i64 = row.get("article_id");
    let parent_id: Option<i64> = row.get("parent_id");

    sqlx::query("DELETE FROM judgements WHERE target_type = 'comment' AND target_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete comment judgements")?;
    sqlx::query("DELETE FROM comments WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete comment")?;

    if let Some(parent_id) = parent_id {
        let sql = format!(
            "UPDATE comments SET reply_count = {} WHERE id = ?",
            decrement_expr(DatabaseDriver::Mysql, "reply_count")
        );
        sqlx::query(&sql)
            .bind(parent_id)
            .execute(&mut *tx)
            .await
            .context("Failed to update reply count")?;
    }

    let sql = format!(
        "UPDATE article_metadata SET comment_count = {} WHERE id = ?",
        decrement_expr(DatabaseDriver::Mysql, "comment_count")
    );
    sqlx::query(&sql)
        .bind(article_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update comment count")?;

    tx.commit().await.context("Failed to commit comment deletion")?;
    Ok(true)
}

fn row_to_comment_mysql(row: &sqlx::mysql::MySqlRow) -> Comment {
    Comment {
        id: row.get("id"),
        article_id: row.get("article_id"),
        user_id: row.get("user_id"),
        parent_id: row.get("parent_id"),
        depth: row.get("depth"),
        content: row.get("content"),
        like_count: row.get("like_count"),
        dislike_count: row.get("dislike_count"),
        reply_count: row.get("reply_count"),
        is_deleted: row.get("is_deleted"),
        is_edited: row.get("is_edited"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn author_from_mysql(row: &sqlx::mysql::MySqlRow) -> Option<PublicUser> {
    build_author(
        row.get("user_id"),
        row.get("author_username"),
        row.get("author_email"),
        row.get("author_display_name"),
        row.get("author_avatar"),
        row.get("author_role"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{insert_article, insert_user, setup_pool};
    use crate::db::repositories::{ArticleMetadataRepository, SqlxArticleMetadataRepository};

    struct Fixture {
        pool: DynDatabasePool,
        repo: SqlxCommentRepository,
        user_id: i64,
        article_id: i64,
    }

    async fn fixture() -> Fixture {
        let pool = setup_pool().await;
        let user_id = insert_user(&pool, "scribe").await;
        let article_id = insert_article(&pool, "hello").await;
        Fixture {
            repo: SqlxCommentRepository::new(pool.clone()),
            pool,
            user_id,
            article_id,
        }
    }

    fn new_comment(f: &Fixture, parent: Option<&Comment>, content: &str) -> NewComment {
        NewComment {
            article_id: f.article_id,
            user_id: f.user_id,
            parent_id: parent.map(|p| p.id),
            depth: parent.map(|p| p.depth + 1).unwrap_or(0),
            content: content.to_string(),
        }
    }

    async fn comment_count(f: &Fixture) -> i64 {
        SqlxArticleMetadataRepository::new(f.pool.clone())
            .get_by_id(f.article_id)
            .await
            .unwrap()
            .unwrap()
            .comment_count
    }

    #[tokio::test]
    async fn test_create_updates_counters() {
        let f = fixture().await;
        let root = f.repo.create(&new_comment(&f, None, "root")).await.unwrap();
        let reply = f
            .repo
            .create(&new_comment(&f, Some(&root), "reply"))
            .await
            .unwrap();

        assert_eq!(reply.depth, 1);
        assert_eq!(reply.parent_id, Some(root.id));
        let root = f.repo.get_by_id(root.id).await.unwrap().unwrap();
        assert_eq!(root.reply_count, 1);
        assert_eq!(comment_count(&f).await, 2);
    }

    #[tokio::test]
    async fn test_list_by_article_includes_authors() {
        let f = fixture().await;
        f.repo.create(&new_comment(&f, None, "first")).await.unwrap();
        f.repo.create(&new_comment(&f, None, "second")).await.unwrap();

        let listed = f.repo.list_by_article(f.article_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].comment.content, "first");
        let author = listed[0].author.as_ref().unwrap();
        assert_eq!(author.username, "scribe");
        assert!(author.avatar.contains("gravatar"));
    }

    #[tokio::test]
    async fn test_update_content_marks_edited() {
        let f = fixture().await;
        let comment = f.repo.create(&new_comment(&f, None, "draft")).await.unwrap();
        let updated = f
            .repo
            .update_content(comment.id, "final")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.content, "final");
        assert!(updated.is_edited);
    }

    #[tokio::test]
    async fn test_soft_delete_detaches_author() {
        let f = fixture().await;
        let comment = f.repo.create(&new_comment(&f, None, "oops")).await.unwrap();
        f.repo.soft_delete(comment.id).await.unwrap();

        let deleted = f.repo.get_by_id(comment.id).await.unwrap().unwrap();
        assert!(deleted.is_deleted);
        assert!(deleted.user_id.is_none());
        assert!(deleted.content.is_empty());
        assert_eq!(comment_count(&f).await, 1);
        assert_eq!(f.repo.count_by_user(f.user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hard_delete_decrements_counters() {
        let f = fixture().await;
        let root = f.repo.create(&new_comment(&f, None, "root")).await.unwrap();
        let reply = f
            .repo
            .create(&new_comment(&f, Some(&root), "reply"))
            .await
            .unwrap();

        assert!(f.repo.hard_delete(reply.id).await.unwrap());
        assert!(!f.repo.hard_delete(reply.id).await.unwrap());

        let root = f.repo.get_by_id(root.id).await.unwrap().unwrap();
        assert_eq!(root.reply_count, 0);
        assert_eq!(comment_count(&f).await, 1);
    }

    #[tokio::test]
    async fn test_list_by_user_paginates() {
        let f = fixture().await;
        for i in 0..3 {
            f.repo
                .create(&new_comment(&f, None, &format!("c{}", i)))
                .await
                .unwrap();
        }

        let (page, total) = f
            .repo
            .list_by_user(f.user_id, &ListParams::new(1, 2))
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "c2");
    }
}
