//! User service
//!
//! Account lifecycle and sessions:
//! - registration (the first account becomes admin)
//! - login, logout and session validation
//! - profile and password changes, account deletion
//! - admin listing and banning

use crate::cache::{Cache, CacheLayer};
use crate::config::AuthConfig;
use crate::db::repositories::{
    CommentRepository, JudgementRepository, SessionRepository, UserRepository,
};
use crate::models::{
    ListParams, PagedResult, Session, UpdateProfileInput, User, UserProfile, UserRole, UserStatus,
};
use crate::services::comment::ALL_TREES_PATTERN;
use crate::services::password::{dummy_verify, hash_password, verify_password};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 32;
const DISPLAY_NAME_MAX: usize = 64;
const BIO_MAX: usize = 500;
const AVATAR_MAX: usize = 512;

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Invalid credentials or missing session
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("Your account has been banned")]
    UserBanned,

    #[error("Registration is closed")]
    RegistrationClosed,

    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Input for user registration
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl RegisterInput {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Input for user login
#[derive(Debug, Clone)]
pub struct LoginInput {
    pub username_or_email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(username_or_email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username_or_email: username_or_email.into(),
            password: password.into(),
        }
    }
}

pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    comment_repo: Arc<dyn CommentRepository>,
    judgement_repo: Arc<dyn JudgementRepository>,
    cache: Cache,
    config: AuthConfig,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        comment_repo: Arc<dyn CommentRepository>,
        judgement_repo: Arc<dyn JudgementRepository>,
        cache: Cache,
        config: AuthConfig,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            comment_repo,
            judgement_repo,
            cache,
            config,
        }
    }

    /// Register a new account.
    ///
    /// The first account in an empty database becomes admin and is accepted
    /// even when registration is closed.
    pub async fn register(&self, input: RegisterInput) -> Result<User, UserServiceError> {
        let is_first = self.is_first_user().await?;
        if !is_first && !self.config.allow_registration {
            return Err(UserServiceError::RegistrationClosed);
        }

        let username = input.username.trim().to_string();
        let email = input.email.trim().to_string();
        validate_username(&username)?;
        validate_email(&email)?;
        self.validate_password(&input.password)?;

        if self
            .user_repo
            .get_by_username(&username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!(
                "Username '{}' is already taken",
                username
            )));
        }
        self.ensure_email_free(&email, None).await?;

        let role = if is_first {
            UserRole::Admin
        } else {
            UserRole::Member
        };
        let password_hash = hash_password(&input.password).context("Failed to hash password")?;

        let user = self
            .user_repo
            .create(&User::new(username, email, password_hash, role))
            .await
            .context("Failed to create user")?;

        tracing::info!("Registered user {} ({}) as {}", user.username, user.id, user.role);
        Ok(user)
    }

    /// Check credentials and open a session.
    pub async fn login(&self, input: LoginInput) -> Result<(User, Session), UserServiceError> {
        let invalid =
            || UserServiceError::AuthenticationError("Invalid username or password".to_string());

        let Some(user) = self
            .find_user_by_username_or_email(input.username_or_email.trim())
            .await?
        else {
            dummy_verify(&input.password);
            return Err(invalid());
        };

        let password_valid = verify_password(&input.password, &user.password_hash)
            .context("Failed to verify password")?;
        if !password_valid {
            return Err(invalid());
        }

        if user.is_banned() {
            tracing::info!("Rejected login for banned user {}", user.id);
            return Err(UserServiceError::UserBanned);
        }

        let session = self.create_session(user.id).await?;
        Ok((user, session))
    }

    /// Key failed logins are counted under: the account's username when the
    /// identifier resolves to one, otherwise the identifier as given.
    pub async fn login_key(&self, username_or_email: &str) -> Result<String, UserServiceError> {
        let identifier = username_or_email.trim();
        Ok(self
            .find_user_by_username_or_email(identifier)
            .await?
            .map(|user| user.username)
            .unwrap_or_else(|| identifier.to_string()))
    }

    pub async fn logout(&self, session_id: &str) -> Result<(), UserServiceError> {
        self.session_repo
            .delete(session_id)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// Resolve a session token to its user.
    ///
    /// Unknown tokens, expired sessions (which are deleted) and banned users
    /// yield `None`.
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let Some(session) = self
            .session_repo
            .get_by_id(token)
            .await
            .context("Failed to get session")?
        else {
            return Ok(None);
        };

        if session.is_expired() {
            self.session_repo
                .delete(token)
                .await
                .context("Failed to delete expired session")?;
            return Ok(None);
        }

        let user = self
            .user_repo
            .get_by_id(session.user_id)
            .await
            .context("Failed to get user")?;

        Ok(user.filter(|u| !u.is_banned()))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        Ok(self
            .user_repo
            .get_by_id(id)
            .await
            .context("Failed to get user by ID")?)
    }

    pub async fn is_first_user(&self) -> Result<bool, UserServiceError> {
        let count = self
            .user_repo
            .count()
            .await
            .context("Failed to count users")?;
        Ok(count == 0)
    }

    /// Delete expired sessions; returns how many were removed
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, UserServiceError> {
        Ok(self
            .session_repo
            .delete_expired()
            .await
            .context("Failed to delete expired sessions")?)
    }

    /// Apply profile changes. Blank strings clear optional fields.
    pub async fn update_profile(
        &self,
        user: &User,
        input: UpdateProfileInput,
    ) -> Result<User, UserServiceError> {
        let mut updated = user.clone();

        if let Some(email) = input.email {
            let email = email.trim().to_string();
            validate_email(&email)?;
            if !email.eq_ignore_ascii_case(&user.email) {
                self.ensure_email_free(&email, Some(user.id)).await?;
            }
            updated.email = email;
        }
        if let Some(display_name) = input.display_name {
            updated.display_name = optional_field("display_name", display_name, DISPLAY_NAME_MAX)?;
        }
        if let Some(bio) = input.bio {
            updated.bio = optional_field("bio", bio, BIO_MAX)?;
        }
        if let Some(avatar) = input.avatar {
            let avatar = optional_field("avatar", avatar, AVATAR_MAX)?;
            if let Some(url) = &avatar {
                if !(url.starts_with("https://") || url.starts_with("http://") || url.starts_with('/')) {
                    return Err(UserServiceError::ValidationError(
                        "Avatar must be an http(s) URL or a site path".to_string(),
                    ));
                }
            }
            updated.avatar = avatar;
        }

        updated.updated_at = Utc::now();
        Ok(self
            .user_repo
            .update(&updated)
            .await
            .context("Failed to update user")?)
    }

    /// Change the password and revoke every session except `current_session`.
    pub async fn change_password(
        &self,
        user: &User,
        current_session: Option<&str>,
        current_password: &str,
        new_password: &str,
    ) -> Result<u64, UserServiceError> {
        if !verify_password(current_password, &user.password_hash)
            .context("Failed to verify password")?
        {
            return Err(UserServiceError::AuthenticationError(
                "Current password is incorrect".to_string(),
            ));
        }
        self.validate_password(new_password)?;

        let mut updated = user.clone();
        updated.password_hash = hash_password(new_password).context("Failed to hash password")?;
        updated.updated_at = Utc::now();
        self.user_repo
            .update(&updated)
            .await
            .context("Failed to update password")?;

        let revoked = self
            .session_repo
            .delete_by_user(user.id, current_session)
            .await
            .context("Failed to revoke sessions")?;
        tracing::info!("User {} changed password, {} session(s) revoked", user.id, revoked);
        Ok(revoked)
    }

    /// Delete the account after confirming the password.
    ///
    /// Judgements are retracted from the counters; comments stay with their
    /// author cleared. Every cached comment tree is dropped.
    pub async fn delete_account(&self, user: &User, password: &str) -> Result<(), UserServiceError> {
        if !verify_password(password, &user.password_hash).context("Failed to verify password")? {
            return Err(UserServiceError::AuthenticationError(
                "Password is incorrect".to_string(),
            ));
        }

        let retracted = self
            .judgement_repo
            .retract_all_by_user(user.id)
            .await
            .context("Failed to retract judgements")?;
        self.user_repo
            .delete(user.id)
            .await
            .context("Failed to delete user")?;

        if let Err(e) = self.cache.delete_pattern(ALL_TREES_PATTERN).await {
            tracing::warn!("Failed to invalidate comment trees after account deletion: {}", e);
        }

        tracing::info!(
            "Deleted account {} ({}), {} judgement(s) retracted",
            user.username,
            user.id,
            retracted
        );
        Ok(())
    }

    /// Public profile page data
    pub async fn public_profile(&self, username: &str) -> Result<UserProfile, UserServiceError> {
        let user = self
            .user_repo
            .get_by_username(username)
            .await
            .context("Failed to get user by username")?
            .ok_or_else(|| UserServiceError::NotFound(username.to_string()))?;

        let comment_count = self
            .comment_repo
            .count_by_user(user.id)
            .await
            .context("Failed to count comments")?;

        Ok(UserProfile {
            user: user.public_profile(),
            bio: user.bio.clone(),
            joined_at: user.created_at,
            comment_count,
        })
    }

    pub async fn list_users(&self, params: &ListParams) -> Result<PagedResult<User>, UserServiceError> {
        let (users, total) = self
            .user_repo
            .list(params)
            .await
            .context("Failed to list users")?;
        Ok(PagedResult::new(users, total, params))
    }

    /// Ban or unban an account. Banning revokes all of its sessions.
    pub async fn set_status(
        &self,
        admin: &User,
        user_id: i64,
        status: UserStatus,
    ) -> Result<User, UserServiceError> {
        if !admin.is_admin() {
            return Err(UserServiceError::Forbidden(
                "Only admins can change account status".to_string(),
            ));
        }
        if admin.id == user_id && status == UserStatus::Banned {
            return Err(UserServiceError::ValidationError(
                "You cannot ban yourself".to_string(),
            ));
        }

        let mut user = self
            .user_repo
            .get_by_id(user_id)
            .await
            .context("Failed to get user")?
            .ok_or_else(|| UserServiceError::NotFound(user_id.to_string()))?;

        user.status = status;
        user.updated_at = Utc::now();
        let user = self
            .user_repo
            .update(&user)
            .await
            .context("Failed to update user status")?;

        if status == UserStatus::Banned {
            let revoked = self
                .session_repo
                .delete_by_user(user.id, None)
                .await
                .context("Failed to revoke sessions")?;
            tracing::info!("User {} banned by {}, {} session(s) revoked", user.id, admin.id, revoked);
        } else {
            tracing::info!("User {} set to {} by {}", user.id, status, admin.id);
        }
        Ok(user)
    }

    fn validate_password(&self, password: &str) -> Result<(), UserServiceError> {
        if password.chars().count() < self.config.min_password_length {
            return Err(UserServiceError::ValidationError(format!(
                "Password must be at least {} characters",
                self.config.min_password_length
            )));
        }
        Ok(())
    }

    async fn ensure_email_free(&self, email: &str, owner: Option<i64>) -> Result<(), UserServiceError> {
        let existing = self
            .user_repo
            .get_by_email(email)
            .await
            .context("Failed to check email")?;
        match existing {
            Some(other) if Some(other.id) != owner => Err(UserServiceError::UserExists(format!(
                "Email '{}' is already registered",
                email
            ))),
            _ => Ok(()),
        }
    }

    async fn find_user_by_username_or_email(
        &self,
        username_or_email: &str,
    ) -> Result<Option<User>, UserServiceError> {
        if let Some(user) = self
            .user_repo
            .get_by_username(username_or_email)
            .await
            .context("Failed to get user by username")?
        {
            return Ok(Some(user));
        }

        Ok(self
            .user_repo
            .get_by_email(username_or_email)
            .await
            .context("Failed to get user by email")?)
    }

    async fn create_session(&self, user_id: i64) -> Result<Session, UserServiceError> {
        let session = Session::issue(user_id, self.config.session_days);
        Ok(self
            .session_repo
            .create(&session)
            .await
            .context("Failed to create session")?)
    }
}

fn validate_username(username: &str) -> Result<(), UserServiceError> {
    let length = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&length) {
        return Err(UserServiceError::ValidationError(format!(
            "Username must be {} to {} characters",
            USERNAME_MIN, USERNAME_MAX
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(UserServiceError::ValidationError(
            "Username may only contain letters, digits, '_' and '-'".to_string(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), UserServiceError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !email.contains(' ') => {
            Ok(())
        }
        _ => Err(UserServiceError::ValidationError(
            "Invalid email format".to_string(),
        )),
    }
}

/// Trimmed value, `None` when blank
fn optional_field(name: &str, value: String, max: usize) -> Result<Option<String>, UserServiceError> {
    let value = value.trim();
    if value.chars().count() > max {
        return Err(UserServiceError::ValidationError(format!(
            "{} must be at most {} characters",
            name, max
        )));
    }
    Ok((!value.is_empty()).then(|| value.to_string()))
}
