//! RSS feed and sitemap, served at the site root

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};

use crate::api::middleware::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/feed.xml", get(rss))
        .route("/sitemap.xml", get(sitemap))
}

async fn rss(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let xml = state.feeds.rss().await?;
    Ok((
        [(header::CONTENT_TYPE, "application/rss+xml; charset=utf-8")],
        xml,
    ))
}

async fn sitemap(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let xml = state.feeds.sitemap().await?;
    Ok(([(header::CONTENT_TYPE, "application/xml; charset=utf-8")], xml))
}
