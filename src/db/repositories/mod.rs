//! Database repositories
//!
//! One repository per entity. Each trait has a single sqlx implementation that
//! dispatches on the configured driver.

pub mod article_metadata;
pub mod comment;
pub mod judgement;
pub mod session;
pub mod user;

pub use article_metadata::{ArticleMetadataRepository, SqlxArticleMetadataRepository};
pub use comment::{CommentRepository, NewComment, SqlxCommentRepository};
pub use judgement::{JudgementChange, JudgementRepository, SqlxJudgementRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use user::{SqlxUserRepository, UserRepository};

use crate::config::DatabaseDriver;

/// SQL expression decrementing a counter column without going below zero
pub(crate) fn decrement_expr(driver: DatabaseDriver, column: &str) -> String {
    match driver {
        DatabaseDriver::Sqlite => format!("MAX(0, {} - 1)", column),
        DatabaseDriver::Mysql => format!("GREATEST(0, {} - 1)", column),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::db::{create_test_pool, migrations, DynDatabasePool};

    pub async fn setup_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    pub async fn insert_user(pool: &DynDatabasePool, username: &str) -> i64 {
        sqlx::query("INSERT INTO users (username, email, password_hash) VALUES (?, ?, 'hash')")
            .bind(username)
            .bind(format!("{}@example.com", username))
            .execute(pool.sqlite().expect("sqlite pool"))
            .await
            .expect("Failed to insert user")
            .last_insert_rowid()
    }

    pub async fn insert_article(pool: &DynDatabasePool, slug: &str) -> i64 {
        sqlx::query("INSERT INTO article_metadata (kind, slug) VALUES ('post', ?)")
            .bind(slug)
            .execute(pool.sqlite().expect("sqlite pool"))
            .await
            .expect("Failed to insert article metadata")
            .last_insert_rowid()
    }
}
