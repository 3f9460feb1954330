//! Shared API response types and error mapping
//!
//! Service errors convert into [`ApiError`] here so handlers can use `?`
//! directly; the error code decides the HTTP status.

use axum::http::{header, HeaderMap, HeaderValue};
use serde::Serialize;

use crate::api::middleware::ApiError;
use crate::models::{ArticleMetadata, Session, User};
use crate::services::{
    CommentServiceError, ContentError, FeedError, JudgementServiceError, UserServiceError,
};

// ============================================================================
// Error conversions
// ============================================================================

impl From<UserServiceError> for ApiError {
    fn from(e: UserServiceError) -> Self {
        match e {
            UserServiceError::AuthenticationError(msg) => ApiError::unauthorized(msg),
            UserServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            UserServiceError::UserExists(msg) => ApiError::conflict(msg),
            UserServiceError::UserBanned => ApiError::new("USER_BANNED", e.to_string()),
            UserServiceError::RegistrationClosed => ApiError::forbidden(e.to_string()),
            UserServiceError::NotFound(_) => ApiError::not_found(e.to_string()),
            UserServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            UserServiceError::InternalError(cause) => ApiError::internal(cause),
        }
    }
}

impl From<CommentServiceError> for ApiError {
    fn from(e: CommentServiceError) -> Self {
        match e {
            CommentServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            CommentServiceError::MaxDepthExceeded(max) => ApiError::with_details(
                "VALIDATION_ERROR",
                e.to_string(),
                serde_json::json!({ "max_depth": max }),
            ),
            CommentServiceError::ArticleNotFound(_) | CommentServiceError::NotFound(_) => {
                ApiError::not_found(e.to_string())
            }
            CommentServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            CommentServiceError::InternalError(cause) => ApiError::internal(cause),
        }
    }
}

impl From<JudgementServiceError> for ApiError {
    fn from(e: JudgementServiceError) -> Self {
        match e {
            JudgementServiceError::NotFound(_) => ApiError::not_found(e.to_string()),
            JudgementServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            JudgementServiceError::InternalError(cause) => ApiError::internal(cause),
        }
    }
}

impl From<ContentError> for ApiError {
    fn from(e: ContentError) -> Self {
        match e {
            ContentError::NotFound(_) => ApiError::not_found(e.to_string()),
            ContentError::InvalidKind(_) => ApiError::validation_error(e.to_string()),
            ContentError::Io(cause) => ApiError::internal(cause),
        }
    }
}

impl From<FeedError> for ApiError {
    fn from(e: FeedError) -> Self {
        ApiError::internal(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::internal(e)
    }
}

// ============================================================================
// Response types
// ============================================================================

/// The account as seen by its owner
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub status: String,
    pub display_name: Option<String>,
    pub avatar: String,
    pub bio: Option<String>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            avatar: user.avatar_url(),
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role.to_string(),
            status: user.status.to_string(),
            display_name: user.display_name,
            bio: user.bio,
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

/// Response for successful authentication
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
    pub expires_at: String,
}

/// Persisted counters of an article
#[derive(Debug, Clone, Serialize)]
pub struct MetadataResponse {
    pub id: i64,
    pub view_count: i64,
    pub like_count: i64,
    pub dislike_count: i64,
    pub comment_count: i64,
}

impl From<&ArticleMetadata> for MetadataResponse {
    fn from(meta: &ArticleMetadata) -> Self {
        Self {
            id: meta.id,
            view_count: meta.view_count,
            like_count: meta.like_count,
            dislike_count: meta.dislike_count,
            comment_count: meta.comment_count,
        }
    }
}

// ============================================================================
// Session cookie
// ============================================================================

fn cookie_header(value: &str) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(value).map_err(ApiError::internal)?,
    );
    Ok(headers)
}

/// `Set-Cookie` carrying a new session
pub fn session_cookie(session: &Session) -> Result<HeaderMap, ApiError> {
    cookie_header(&format!(
        "session={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        session.id,
        session.max_age_seconds()
    ))
}

/// `Set-Cookie` removing the session
pub fn clear_session_cookie() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_static("session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    );
    headers
}
