//! Admin API endpoints
//!
//! All routes sit behind `require_auth` and `require_admin`:
//! - GET /api/v1/admin/users - Paginated accounts
//! - PUT /api/v1/admin/users/{id}/status - Ban or unban
//! - POST /api/v1/admin/content/reload - Rescan the content root
//! - GET /api/v1/admin/stats - Runtime statistics

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::UserResponse;
use crate::cache::CacheLayer;
use crate::models::{PagedResult, UserStatus};
use crate::services::ContentStats;

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: UserStatus,
}

#[derive(Debug, Serialize)]
pub struct SystemStatsResponse {
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
    pub cache_entries: u64,
    pub content: ContentStats,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/{id}/status", put(update_user_status))
        .route("/content/reload", post(reload_content))
        .route("/stats", get(get_stats))
}

/// GET /api/v1/admin/users
async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<UserResponse>>, ApiError> {
    let users = state.user_service.list_users(&query.params()).await?;
    Ok(Json(users.map(UserResponse::from)))
}

/// PUT /api/v1/admin/users/{id}/status
async fn update_user_status(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .user_service
        .set_status(&admin.0, id, body.status)
        .await?;
    Ok(Json(user.into()))
}

/// POST /api/v1/admin/content/reload
///
/// Rebuilds the content index and drops every cached tree and feed.
async fn reload_content(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
) -> Result<Json<ContentStats>, ApiError> {
    let content = state.content.clone();
    let stats = tokio::task::spawn_blocking(move || content.reload())
        .await
        .map_err(ApiError::internal)??;

    state.feeds.invalidate().await;
    if let Err(e) = state.cache.clear().await {
        tracing::warn!("Failed to clear cache after reload: {}", e);
    }

    tracing::info!(
        "Content reloaded by user {}: {} documents, {} skipped",
        admin.0.id,
        stats.total,
        stats.skipped
    );
    Ok(Json(stats))
}

/// GET /api/v1/admin/stats
async fn get_stats(State(state): State<AppState>) -> Json<SystemStatsResponse> {
    let stats = &state.request_stats;
    Json(SystemStatsResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: stats.uptime_seconds(),
        total_requests: stats.total_requests(),
        avg_response_time_ms: (stats.avg_response_time_us() / 10.0).round() / 100.0,
        cache_entries: state.cache.entry_count().await,
        content: state.content.stats(),
    })
}
