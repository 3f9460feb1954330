//! Article API endpoints
//!
//! Read-only views over the compiled content index, joined with the
//! persisted counters:
//! - GET /api/v1/articles - List documents with pagination
//! - GET /api/v1/articles/{kind}/{*slug} - One document
//! - POST /api/v1/views/{article_id} - Count a view
//! - GET /api/v1/courses/{*slug} - Course with chapters
//! - GET /api/v1/tags - Tag counts
//! - GET /api/v1/search - Search

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::api::common::{default_page, default_page_size};
use crate::api::middleware::{ApiError, AppState, MaybeUser};
use crate::api::responses::MetadataResponse;
use crate::models::{
    Article, ArticleSummary, ContentKind, Course, Judgement, JudgementTarget, ListParams,
    PagedResult, TagCount,
};
use crate::services::{ContentError, ContentQuery, Neighbors};

const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Query parameters for listing articles
#[derive(Debug, Deserialize)]
pub struct ListArticlesQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Filter by kind (`post`, `posts`, `course`, ...)
    pub kind: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

/// List entry: the summary plus counters once the document has been viewed
#[derive(Debug, Serialize)]
pub struct ArticleListItem {
    #[serde(flatten)]
    pub summary: ArticleSummary,
    pub metadata: Option<MetadataResponse>,
}

#[derive(Debug, Serialize)]
pub struct ArticleDetailResponse {
    #[serde(flatten)]
    pub article: Article,
    #[serde(flatten)]
    pub neighbors: Neighbors,
    pub metadata: MetadataResponse,
    pub my_judgement: Option<Judgement>,
}

#[derive(Debug, Serialize)]
pub struct ViewCountResponse {
    pub view_count: i64,
}

#[derive(Debug, Serialize)]
pub struct TagListResponse {
    pub tags: Vec<TagCount>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<ArticleSummary>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/articles", get(list_articles))
        .route("/articles/{kind}/{*slug}", get(get_article))
        .route("/views/{article_id}", post(record_view))
        .route("/courses/{*slug}", get(get_course))
        .route("/tags", get(list_tags))
        .route("/search", get(search))
}

fn parse_kind(kind: &str) -> Result<ContentKind, ContentError> {
    ContentKind::from_str(kind).map_err(|_| ContentError::InvalidKind(kind.to_string()))
}

/// GET /api/v1/articles
async fn list_articles(
    State(state): State<AppState>,
    Query(query): Query<ListArticlesQuery>,
) -> Result<Json<PagedResult<ArticleListItem>>, ApiError> {
    let kind = query.kind.as_deref().map(parse_kind).transpose()?;
    let params = ListParams::new(query.page, query.page_size);
    let content_query = ContentQuery {
        kind,
        tag: query.tag.filter(|t| !t.trim().is_empty()),
    };
    let page = state.content.list(&content_query, &params);

    // One query for every counter row; documents never viewed have none yet
    let metadata: HashMap<(ContentKind, String), MetadataResponse> = state
        .article_repo
        .list(kind)
        .await?
        .iter()
        .map(|meta| ((meta.kind, meta.slug.clone()), MetadataResponse::from(meta)))
        .collect();

    Ok(Json(page.map(|summary| ArticleListItem {
        metadata: metadata.get(&(summary.kind, summary.slug.clone())).cloned(),
        summary,
    })))
}

/// GET /api/v1/articles/{kind}/{*slug}
///
/// Creates the counter row on first access.
async fn get_article(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path((kind, slug)): Path<(String, String)>,
) -> Result<Json<ArticleDetailResponse>, ApiError> {
    let kind = parse_kind(&kind)?;
    let article = state.content.get(kind, &slug)?;
    let neighbors = state.content.neighbors(&article);

    let meta = state.article_repo.ensure(kind, &article.slug).await?;
    let summary = state
        .judgement_service
        .summary(JudgementTarget::article(meta.id), viewer.user())
        .await?;

    Ok(Json(ArticleDetailResponse {
        article: Article::clone(&article),
        neighbors,
        metadata: MetadataResponse::from(&meta),
        my_judgement: summary.my_judgement,
    }))
}

/// POST /api/v1/views/{article_id}
async fn record_view(
    State(state): State<AppState>,
    Path(article_id): Path<i64>,
) -> Result<Json<ViewCountResponse>, ApiError> {
    let view_count = state
        .article_repo
        .increment_views(article_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Article {} not found", article_id)))?;
    Ok(Json(ViewCountResponse { view_count }))
}

/// GET /api/v1/courses/{*slug}
async fn get_course(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Course>, ApiError> {
    Ok(Json(state.content.course(&slug)?))
}

/// GET /api/v1/tags
async fn list_tags(State(state): State<AppState>) -> Json<TagListResponse> {
    Json(TagListResponse {
        tags: state.content.tags(),
    })
}

/// GET /api/v1/search?q=&limit=
async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Json<SearchResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let results = state.content.search(&query.q, limit);
    Json(SearchResponse {
        query: query.q,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("posts").unwrap(), ContentKind::Post);
        assert!(matches!(
            parse_kind("pages"),
            Err(ContentError::InvalidKind(k)) if k == "pages"
        ));
    }

    #[test]
    fn test_list_query_defaults() {
        let query: ListArticlesQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.page, 1);
        assert_eq!(query.page_size, 10);
        assert!(query.kind.is_none());
    }
}
