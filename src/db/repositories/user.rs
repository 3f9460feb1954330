//! User repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{ListParams, User, UserRole, UserStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

const USER_COLUMNS: &str = "id, username, email, password_hash, role, status, display_name, avatar, bio, created_at, updated_at";

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user, returning it with its assigned id
    async fn create(&self, user: &User) -> Result<User>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Persist every mutable field of `user`
    async fn update(&self, user: &User) -> Result<User>;

    async fn delete(&self, id: i64) -> Result<()>;

    async fn count(&self) -> Result<i64>;

    /// Newest accounts first, with the total count
    async fn list(&self, params: &ListParams) -> Result<(Vec<User>, i64)>;
}

pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_user_sqlite(self.pool.sqlite()?, user).await,
            DatabaseDriver::Mysql => create_user_mysql(self.pool.mysql()?, user).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.sqlite()?)
                    .await
                    .context("Failed to get user by ID")?;
                row.as_ref().map(row_to_user_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.mysql()?)
                    .await
                    .context("Failed to get user by ID")?;
                row.as_ref().map(row_to_user_mysql).transpose()
            }
        }
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_user_by_field_sqlite(self.pool.sqlite()?, "username", username).await
            }
            DatabaseDriver::Mysql => {
                get_user_by_field_mysql(self.pool.mysql()?, "username", username).await
            }
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_user_by_field_sqlite(self.pool.sqlite()?, "email", email).await
            }
            DatabaseDriver::Mysql => {
                get_user_by_field_mysql(self.pool.mysql()?, "email", email).await
            }
        }
    }

    async fn update(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_user_sqlite(self.pool.sqlite()?, user).await?,
            DatabaseDriver::Mysql => update_user_mysql(self.pool.mysql()?, user).await?,
        }
        self.get_by_id(user.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User not found after update"))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let sql = "DELETE FROM users WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(id)
                    .execute(self.pool.sqlite()?)
                    .await
                    .context("Failed to delete user")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(id)
                    .execute(self.pool.mysql()?)
                    .await
                    .context("Failed to delete user")?;
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM users";
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .fetch_one(self.pool.sqlite()?)
                .await
                .context("Failed to count users")?,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .fetch_one(self.pool.mysql()?)
                .await
                .context("Failed to count users")?,
        };
        Ok(count)
    }

    async fn list(&self, params: &ListParams) -> Result<(Vec<User>, i64)> {
        let sql = format!(
            "SELECT {} FROM users ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            USER_COLUMNS
        );
        let users = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to list users")?
                .iter()
                .map(row_to_user_sqlite)
                .collect::<Result<Vec<_>>>()?,
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to list users")?
                .iter()
                .map(row_to_user_mysql)
                .collect::<Result<Vec<_>>>()?,
        };
        let total = self.count().await?;
        Ok((users, total))
    }
}

fn parse_role_status(role: &str, status: &str) -> Result<(UserRole, UserStatus)> {
    let role = UserRole::from_str(role)
        .with_context(|| format!("Invalid role in database: {}", role))?;
    let status = UserStatus::from_str(status).unwrap_or_default();
    Ok((role, status))
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, role, status, display_name, avatar, bio, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(&user.display_name)
    .bind(&user.avatar)
    .bind(&user.bio)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_rowid(),
        created_at: now,
        updated_at: now,
        ..user.clone()
    })
}

async fn get_user_by_field_sqlite(
    pool: &SqlitePool,
    field: &'static str,
    value: &str,
) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, field);
    let row = sqlx::query(&sql)
        .bind(value)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to get user by {}", field))?;

    row.as_ref().map(row_to_user_sqlite).transpose()
}

async fn update_user_sqlite(pool: &SqlitePool, user: &User) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE users
        SET email = ?, password_hash = ?, role = ?, status = ?, display_name = ?, avatar = ?, bio = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(&user.display_name)
    .bind(&user.avatar)
    .bind(&user.bio)
    .bind(Utc::now())
    .bind(user.id)
    .execute(pool)
    .await
    .context("Failed to update user")?;

    Ok(())
}

fn row_to_user_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    let role: String = row.get("role");
    let status: String = row.get("status");
    let (role, status) = parse_role_status(&role, &status)?;

    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role,
        status,
        display_name: row.get("display_name"),
        avatar: row.get("avatar"),
        bio: row.get("bio"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, role, status, display_name, avatar, bio, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(&user.display_name)
    .bind(&user.avatar)
    .bind(&user.bio)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_id() as i64,
        created_at: now,
        updated_at: now,
        ..user.clone()
    })
}

async fn get_user_by_field_mysql(
    pool: &MySqlPool,
    field: &'static str,
    value: &str,
) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, field);
    let row = sqlx::query(&sql)
        .bind(value)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to get user by {}", field))?;

    row.as_ref().map(row_to_user_mysql).transpose()
}

async fn update_user_mysql(pool: &MySqlPool, user: &User) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE users
        SET email = ?, password_hash = ?, role = ?, status = ?, display_name = ?, avatar = ?, bio = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(&user.display_name)
    .bind(&user.avatar)
    .bind(&user.bio)
    .bind(Utc::now())
    .bind(user.id)
    .execute(pool)
    .await
    .context("Failed to update user")?;

    Ok(())
}

fn row_to_user_mysql(row: &sqlx::mysql::MySqlRow) -> Result<User> {
    let role: String = row.get("role");
    let status: String = row.get("status");
    let (role, status) = parse_role_status(&role, &status)?;

    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role,
        status,
        display_name: row.get("display_name"),
        avatar: row.get("avatar"),
        bio: row.get("bio"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::setup_pool;

    fn new_user(username: &str) -> User {
        User::new(
            username.to_string(),
            format!("{}@example.com", username),
            "hash".to_string(),
            UserRole::Member,
        )
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let repo = SqlxUserRepository::new(setup_pool().await);
        let created = repo.create(&new_user("scribe")).await.unwrap();
        assert!(created.id > 0);

        let by_id = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "scribe");
        assert_eq!(by_id.role, UserRole::Member);
        assert_eq!(by_id.status, UserStatus::Active);

        assert!(repo.get_by_username("scribe").await.unwrap().is_some());
        assert!(repo.get_by_email("scribe@example.com").await.unwrap().is_some());
        assert!(repo.get_by_username("nobody").await.unwrap().is_none());
        assert!(repo.get_by_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_constraints() {
        let repo = SqlxUserRepository::new(setup_pool().await);
        repo.create(&new_user("scribe")).await.unwrap();

        let mut same_name = new_user("scribe");
        same_name.email = "other@example.com".to_string();
        assert!(repo.create(&same_name).await.is_err());

        let mut same_email = new_user("other");
        same_email.email = "scribe@example.com".to_string();
        assert!(repo.create(&same_email).await.is_err());
    }

    #[tokio::test]
    async fn test_update_profile_fields() {
        let repo = SqlxUserRepository::new(setup_pool().await);
        let mut user = repo.create(&new_user("scribe")).await.unwrap();

        user.display_name = Some("The Scribe".to_string());
        user.bio = Some("Copies manuscripts".to_string());
        user.status = UserStatus::Banned;
        let updated = repo.update(&user).await.unwrap();

        assert_eq!(updated.display_name.as_deref(), Some("The Scribe"));
        assert_eq!(updated.bio.as_deref(), Some("Copies manuscripts"));
        assert!(updated.is_banned());
    }

    #[tokio::test]
    async fn test_list_and_count() {
        let repo = SqlxUserRepository::new(setup_pool().await);
        for name in ["alpha", "beta", "gamma"] {
            repo.create(&new_user(name)).await.unwrap();
        }

        assert_eq!(repo.count().await.unwrap(), 3);
        let (page, total) = repo.list(&ListParams::new(1, 2)).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].username, "gamma");
    }

    #[tokio::test]
    async fn test_delete_user() {
        let repo = SqlxUserRepository::new(setup_pool().await);
        let user = repo.create(&new_user("scribe")).await.unwrap();
        repo.delete(user.id).await.unwrap();
        assert!(repo.get_by_id(user.id).await.unwrap().is_none());
    }
}
