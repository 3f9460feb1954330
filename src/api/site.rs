//! Public site information API
//!
//! Used by the frontend for the header, footer and landing counters.

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::api::middleware::AppState;
use crate::models::ContentKind;

#[derive(Debug, Serialize)]
pub struct SiteInfoResponse {
    pub version: &'static str,
    pub title: String,
    pub description: String,
    pub url: String,
    pub total: usize,
    pub kinds: BTreeMap<ContentKind, usize>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/site", get(get_site_info))
        .route("/site/health", get(health))
}

/// GET /api/v1/site
async fn get_site_info(State(state): State<AppState>) -> Json<SiteInfoResponse> {
    let config = state.content.config();
    let stats = state.content.stats();
    Json(SiteInfoResponse {
        version: env!("CARGO_PKG_VERSION"),
        title: config.site_title.clone(),
        description: config.site_description.clone(),
        url: config.site_url.clone(),
        total: stats.total,
        kinds: stats.kinds,
    })
}

/// GET /api/v1/site/health
async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.pool.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                database: "ok",
            }),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    database: "unreachable",
                }),
            )
        }
    }
}
