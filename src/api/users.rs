//! Public profile endpoints
//!
//! - GET /api/v1/users/{username}
//! - GET /api/v1/users/{username}/comments

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState};
use crate::models::{Comment, PagedResult, UserProfile};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/{username}", get(get_profile))
        .route("/users/{username}/comments", get(list_comments))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<UserProfile>, ApiError> {
    let profile = state.user_service.public_profile(&username).await?;
    Ok(Json(profile))
}

/// Non-deleted comments of a user, newest first
async fn list_comments(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<Comment>>, ApiError> {
    let profile = state.user_service.public_profile(&username).await?;
    let comments = state
        .comment_service
        .list_by_user(profile.user.id, &query.params())
        .await?;
    Ok(Json(comments))
}
