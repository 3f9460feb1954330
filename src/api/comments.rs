//! Comment API endpoints
//!
//! - GET /api/v1/comments?article_id=&sort= - Comment tree of an article
//! - GET /api/v1/comments/{id} - Thread rooted at one comment
//! - POST /api/v1/comments - Post a comment or reply (auth)
//! - PUT /api/v1/comments/{id} - Edit own comment (auth)
//! - DELETE /api/v1/comments/{id} - Delete as author or admin (auth)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser, MaybeUser};
use crate::models::{Comment, CommentNode, CommentSort, CreateCommentInput};
use crate::services::DeleteOutcome;

#[derive(Debug, Deserialize)]
pub struct TreeQuery {
    pub article_id: i64,
    pub sort: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommentTreeResponse {
    pub article_id: i64,
    pub sort: CommentSort,
    /// Number of comments in the tree, deleted placeholders included
    pub total: usize,
    pub comments: Vec<CommentNode>,
}

#[derive(Debug, Deserialize)]
pub struct EditCommentRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteCommentResponse {
    /// `soft` when the comment was blanked, `removed` otherwise
    pub mode: &'static str,
    pub removed: usize,
}

impl From<DeleteOutcome> for DeleteCommentResponse {
    fn from(outcome: DeleteOutcome) -> Self {
        match outcome {
            DeleteOutcome::SoftDeleted => Self {
                mode: "soft",
                removed: 0,
            },
            DeleteOutcome::Removed(removed) => Self {
                mode: "removed",
                removed,
            },
        }
    }
}

/// Routes readable without an account
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/comments", get(get_tree))
        .route("/comments/{id}", get(get_thread))
}

/// Routes that require the auth middleware
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/comments", post(create_comment))
        .route("/comments/{id}", put(edit_comment).delete(delete_comment))
}

/// GET /api/v1/comments?article_id=&sort=
async fn get_tree(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Query(query): Query<TreeQuery>,
) -> Result<Json<CommentTreeResponse>, ApiError> {
    let sort = match query.sort.as_deref() {
        Some(s) => {
            CommentSort::from_str(s).map_err(|e| ApiError::validation_error(e.to_string()))?
        }
        None => CommentSort::default(),
    };

    let comments = state
        .comment_service
        .tree(query.article_id, sort, viewer.user())
        .await?;

    Ok(Json(CommentTreeResponse {
        article_id: query.article_id,
        sort,
        total: comments.iter().map(CommentNode::size).sum(),
        comments,
    }))
}

/// GET /api/v1/comments/{id}
async fn get_thread(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<i64>,
) -> Result<Json<CommentNode>, ApiError> {
    let node = state.comment_service.thread(id, viewer.user()).await?;
    Ok(Json(node))
}

/// POST /api/v1/comments
async fn create_comment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CreateCommentInput>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    let comment = state.comment_service.create(body, &user.0).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// PUT /api/v1/comments/{id}
async fn edit_comment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<EditCommentRequest>,
) -> Result<Json<Comment>, ApiError> {
    let comment = state
        .comment_service
        .edit(id, &body.content, &user.0)
        .await?;
    Ok(Json(comment))
}

/// DELETE /api/v1/comments/{id}
async fn delete_comment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<DeleteCommentResponse>, ApiError> {
    let outcome = state.comment_service.delete(id, &user.0).await?;
    Ok(Json(outcome.into()))
}
