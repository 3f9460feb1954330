//! Like/dislike endpoints
//!
//! - POST /api/v1/judgements - Judge an article or comment (auth)
//! - GET /api/v1/judgements/{target_type}/{target_id} - Counters of a target

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser, MaybeUser};
use crate::models::{Judgement, JudgementSummary, JudgementTarget, TargetType};

/// `value: null` (or omitted) clears the caller's judgement
#[derive(Debug, Deserialize)]
pub struct JudgeRequest {
    pub target_type: TargetType,
    pub target_id: i64,
    #[serde(default)]
    pub value: Option<Judgement>,
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/judgements/{target_type}/{target_id}", get(get_summary))
}

pub fn protected_router() -> Router<AppState> {
    Router::new().route("/judgements", post(judge))
}

/// POST /api/v1/judgements
async fn judge(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<JudgeRequest>,
) -> Result<Json<JudgementSummary>, ApiError> {
    let target = JudgementTarget {
        target_type: body.target_type,
        target_id: body.target_id,
    };
    let summary = state
        .judgement_service
        .judge(target, &user.0, body.value)
        .await?;
    Ok(Json(summary))
}

/// GET /api/v1/judgements/{target_type}/{target_id}
async fn get_summary(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path((target_type, target_id)): Path<(TargetType, i64)>,
) -> Result<Json<JudgementSummary>, ApiError> {
    let target = JudgementTarget {
        target_type,
        target_id,
    };
    let summary = state
        .judgement_service
        .summary(target, viewer.user())
        .await?;
    Ok(Json(summary))
}
