//! Authentication API endpoints
//!
//! - POST /api/v1/auth/register - Create an account and sign in
//! - POST /api/v1/auth/login - Sign in
//! - POST /api/v1/auth/logout - Sign out
//! - GET /api/v1/auth/me - Current account
//! - PUT /api/v1/auth/profile - Update profile fields
//! - PUT /api/v1/auth/password - Change password
//! - DELETE /api/v1/auth/account - Delete the account
//! - GET /api/v1/auth/has-admin - Whether setup has happened

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{
    client_ip, extract_session_token, ApiError, AppState, AuthenticatedUser,
};
use crate::api::responses::{clear_session_cookie, session_cookie, AuthResponse, UserResponse};
use crate::models::{Session, UpdateProfileInput, User};
use crate::services::user::{LoginInput, RegisterInput, UserServiceError};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct ChangePasswordResponse {
    pub revoked_sessions: u64,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAccountRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct HasAdminResponse {
    pub has_admin: bool,
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/has-admin", get(has_admin))
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(get_current_user))
        .route("/profile", put(update_profile))
        .route("/password", put(change_password))
        .route("/account", delete(delete_account))
}

fn auth_response(
    status: StatusCode,
    user: User,
    session: Session,
) -> Result<impl IntoResponse, ApiError> {
    let headers = session_cookie(&session)?;
    Ok((
        status,
        headers,
        Json(AuthResponse {
            user: user.into(),
            token: session.id,
            expires_at: session.expires_at.to_rfc3339(),
        }),
    ))
}

/// GET /api/v1/auth/has-admin
async fn has_admin(State(state): State<AppState>) -> Result<Json<HasAdminResponse>, ApiError> {
    let is_first = state.user_service.is_first_user().await?;
    Ok(Json(HasAdminResponse {
        has_admin: !is_first,
    }))
}

/// POST /api/v1/auth/register
async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let password = body.password.clone();
    let user = state
        .user_service
        .register(RegisterInput::new(body.username, body.email, body.password))
        .await?;

    let (user, session) = state
        .user_service
        .login(LoginInput::new(user.username.clone(), password))
        .await?;

    auth_response(StatusCode::CREATED, user, session)
}

/// POST /api/v1/auth/login
///
/// Limited to 10 requests per minute per IP and 5 failures per 15 minutes
/// per account, whether it is addressed by username or email.
async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(ip) = client_ip(&headers) {
        if state.rate_limiter.check_ip(ip).await {
            tracing::warn!("Login rate limit hit for {}", ip);
            return Err(ApiError::rate_limited(
                "Too many requests, please try again later",
                60,
            ));
        }
    }

    let identifier = body.username_or_email.trim().to_string();
    let username = state.user_service.login_key(&identifier).await?;
    if state.rate_limiter.is_username_limited(&username).await {
        return Err(ApiError::rate_limited(
            "Too many failed attempts, please try again in 15 minutes",
            900,
        ));
    }

    match state
        .user_service
        .login(LoginInput::new(identifier, body.password))
        .await
    {
        Ok((user, session)) => {
            state.rate_limiter.clear_username_attempts(&username).await;
            tracing::info!("User {} logged in", user.id);
            auth_response(StatusCode::OK, user, session)
        }
        Err(e) => {
            if matches!(e, UserServiceError::AuthenticationError(_)) {
                state.rate_limiter.record_failed_attempt(&username).await;
            }
            Err(e.into())
        }
    }
}

/// POST /api/v1/auth/logout
async fn logout(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = extract_session_token(&headers)
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;
    state.user_service.logout(&token).await?;
    Ok((StatusCode::NO_CONTENT, clear_session_cookie()))
}

/// GET /api/v1/auth/me
async fn get_current_user(user: AuthenticatedUser) -> Json<UserResponse> {
    Json(user.0.into())
}

/// PUT /api/v1/auth/profile
///
/// Omitted fields stay unchanged; blank strings clear optional fields.
async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<UpdateProfileInput>,
) -> Result<Json<UserResponse>, ApiError> {
    let updated = state.user_service.update_profile(&user.0, body).await?;
    Ok(Json(updated.into()))
}

/// PUT /api/v1/auth/password
///
/// Every other session of the account is revoked.
async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<ChangePasswordResponse>, ApiError> {
    let current = extract_session_token(&headers);
    let revoked_sessions = state
        .user_service
        .change_password(
            &user.0,
            current.as_deref(),
            &body.current_password,
            &body.new_password,
        )
        .await?;
    Ok(Json(ChangePasswordResponse { revoked_sessions }))
}

/// DELETE /api/v1/auth/account
async fn delete_account(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<DeleteAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .user_service
        .delete_account(&user.0, &body.password)
        .await?;
    Ok((StatusCode::NO_CONTENT, clear_session_cookie()))
}
