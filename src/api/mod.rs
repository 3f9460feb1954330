//! API layer - HTTP handlers and routing
//!
//! Everything JSON lives under `/api/v1`:
//! - Article, course, tag and search endpoints over the content index
//! - Auth and profile endpoints
//! - Comment and judgement endpoints
//! - Admin endpoints (accounts, content reload, stats)
//! - Site info and health
//!
//! The RSS feed and sitemap are served at the root; any other path falls
//! back to files under `server.public_dir`.

pub mod admin;
pub mod articles;
pub mod auth;
pub mod comments;
pub mod common;
pub mod feeds;
pub mod judgements;
pub mod middleware;
pub mod responses;
pub mod site;
pub mod users;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, services::ServeDir, trace::TraceLayer,
};

pub use middleware::{ApiError, AppState, RequestStats};

/// Build the `/api/v1` router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need admin role)
    let admin_routes = Router::new()
        .nest("/admin", admin::router())
        .route_layer(axum_middleware::from_fn(middleware::require_admin))
        .route_layer(axum_middleware::from_fn(middleware::require_auth));

    // Protected routes (need auth but not admin)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .merge(comments::protected_router())
        .merge(judgements::protected_router())
        .route_layer(axum_middleware::from_fn(middleware::require_auth));

    // Public routes
    Router::new()
        .merge(articles::router())
        .merge(site::router())
        .merge(users::router())
        .merge(comments::public_router())
        .merge(judgements::public_router())
        .nest("/auth", auth::public_router())
        .merge(admin_routes)
        .merge(protected_routes)
        // Runs before the guards above so they see the resolved user
        .layer(axum_middleware::from_fn_with_state(
            state,
            middleware::resolve_session,
        ))
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
        .allow_credentials(true);

    match origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(e) => {
            tracing::warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
            cors
        }
    }
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    let public_dir = state.config.server.public_dir.clone();

    Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .merge(feeds::router())
        .fallback_service(ServeDir::new(public_dir))
        .layer(cors_layer(&state.config.server.cors_origin))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        // Request stats middleware (outermost layer, runs for all requests)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::{Config, ContentConfig};
    use crate::db::repositories::test_support::setup_pool;
    use crate::services::ContentService;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        _dir: TempDir,
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    async fn app() -> TestApp {
        let dir = TempDir::new().unwrap();
        let content_root = dir.path().join("content");
        write(
            &content_root,
            "posts/hello.md",
            "---\ntitle: Hello\ndate: 2024-02-01\ntags: [intro]\n---\n## Start\n\nFirst words.",
        );
        write(
            &content_root,
            "courses/rust/index.md",
            "---\ntitle: Rust\n---\nA course.",
        );
        write(
            &content_root,
            "courses/rust/basics.md",
            "---\ntitle: Basics\norder: 1\n---\nChapter one.",
        );
        write(
            &content_root,
            "courses/rust/traits.md",
            "---\ntitle: Traits\norder: 2\n---\nChapter two.",
        );
        write(&dir.path().join("public"), "robots.txt", "User-agent: *");

        let mut config = Config::default();
        config.server.public_dir = dir.path().join("public");
        config.content = ContentConfig {
            root: content_root,
            site_url: "https://scriptorium.test".to_string(),
            ..ContentConfig::default()
        };

        let pool = setup_pool().await;
        let content = Arc::new(ContentService::load(config.content.clone()).unwrap());
        let state = AppState::new(pool, config, Arc::new(MemoryCache::new()), content).unwrap();
        TestApp {
            router: build_router(state),
            _dir: dir,
        }
    }

    async fn send(
        app: &TestApp,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.router.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn register(app: &TestApp, username: &str) -> String {
        let response = send(
            app,
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "password": "correct horse"
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get(header::SET_COOKIE).is_some());
        json_body(response).await["token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_articles_and_lazy_metadata() {
        let app = app().await;

        let list = json_body(send(&app, "GET", "/api/v1/articles?kind=posts", None, None).await).await;
        assert_eq!(list["total"], 1);
        assert_eq!(list["items"][0]["slug"], "hello");
        assert!(list["items"][0]["metadata"].is_null());

        let response = send(&app, "GET", "/api/v1/articles/posts/hello", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let article = json_body(response).await;
        assert_eq!(article["title"], "Hello");
        assert_eq!(article["toc"][0]["anchor"], "start");
        assert_eq!(article["metadata"]["view_count"], 0);
        assert!(article["my_judgement"].is_null());

        let id = article["metadata"]["id"].as_i64().unwrap();
        let views = json_body(send(&app, "POST", &format!("/api/v1/views/{}", id), None, None).await).await;
        assert_eq!(views["view_count"], 1);

        let list = json_body(send(&app, "GET", "/api/v1/articles?kind=post", None, None).await).await;
        assert_eq!(list["items"][0]["metadata"]["view_count"], 1);
    }

    #[tokio::test]
    async fn test_article_errors() {
        let app = app().await;
        let missing = send(&app, "GET", "/api/v1/articles/posts/nope", None, None).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let bad_kind = send(&app, "GET", "/api/v1/articles/pages/hello", None, None).await;
        assert_eq!(bad_kind.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(bad_kind).await["error"]["code"], "VALIDATION_ERROR");

        let no_view = send(&app, "POST", "/api/v1/views/999", None, None).await;
        assert_eq!(no_view.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_course_chapter_neighbors() {
        let app = app().await;
        let course = json_body(send(&app, "GET", "/api/v1/courses/rust", None, None).await).await;
        assert_eq!(course["chapters"].as_array().unwrap().len(), 2);

        let chapter =
            json_body(send(&app, "GET", "/api/v1/articles/courses/rust/basics", None, None).await)
                .await;
        assert!(chapter["prev"].is_null());
        assert_eq!(chapter["next"]["slug"], "rust/traits");
    }

    #[tokio::test]
    async fn test_tags_search_and_site() {
        let app = app().await;
        let tags = json_body(send(&app, "GET", "/api/v1/tags", None, None).await).await;
        assert_eq!(tags["tags"][0]["name"], "intro");

        let search = json_body(send(&app, "GET", "/api/v1/search?q=trait", None, None).await).await;
        assert_eq!(search["results"][0]["title"], "Traits");

        let site = json_body(send(&app, "GET", "/api/v1/site", None, None).await).await;
        assert_eq!(site["url"], "https://scriptorium.test");
        assert_eq!(site["kinds"]["course"], 3);

        let health = send(&app, "GET", "/api/v1/site/health", None, None).await;
        assert_eq!(health.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_flow() {
        let app = app().await;
        let has_admin = json_body(send(&app, "GET", "/api/v1/auth/has-admin", None, None).await).await;
        assert_eq!(has_admin["has_admin"], false);

        let token = register(&app, "founder").await;
        let me = json_body(send(&app, "GET", "/api/v1/auth/me", Some(&token), None).await).await;
        assert_eq!(me["username"], "founder");
        assert_eq!(me["role"], "admin");

        let anonymous = send(&app, "GET", "/api/v1/auth/me", None, None).await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let bad_login = send(
            &app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "username_or_email": "founder", "password": "wrong" })),
        )
        .await;
        assert_eq!(bad_login.status(), StatusCode::UNAUTHORIZED);

        let login = send(
            &app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "username_or_email": "founder@example.com", "password": "correct horse" })),
        )
        .await;
        assert_eq!(login.status(), StatusCode::OK);

        let logout = send(&app, "POST", "/api/v1/auth/logout", Some(&token), None).await;
        assert_eq!(logout.status(), StatusCode::NO_CONTENT);
        let after = send(&app, "GET", "/api/v1/auth/me", Some(&token), None).await;
        assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_failures_shared_between_username_and_email() {
        let app = app().await;
        register(&app, "keeper").await;

        for identifier in ["keeper", "keeper@example.com"].iter().cycle().take(5) {
            let response = send(
                &app,
                "POST",
                "/api/v1/auth/login",
                None,
                Some(json!({ "username_or_email": identifier, "password": "wrong" })),
            )
            .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let locked = send(
            &app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "username_or_email": "keeper@example.com", "password": "correct horse" })),
        )
        .await;
        assert_eq!(locked.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_session_cookie_accepted() {
        let app = app().await;
        let token = register(&app, "cookie_user").await;
        let request = Request::builder()
            .uri("/api/v1/auth/me")
            .header(header::COOKIE, format!("theme=dark; session={}", token))
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_comments_and_judgements() {
        let app = app().await;
        let admin = register(&app, "founder").await;
        let reader = register(&app, "reader").await;

        let article = json_body(send(&app, "GET", "/api/v1/articles/posts/hello", None, None).await).await;
        let article_id = article["metadata"]["id"].as_i64().unwrap();

        let anonymous = send(
            &app,
            "POST",
            "/api/v1/comments",
            None,
            Some(json!({ "article_id": article_id, "content": "hi" })),
        )
        .await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let created = send(
            &app,
            "POST",
            "/api/v1/comments",
            Some(&reader),
            Some(json!({ "article_id": article_id, "content": "  Nice post  " })),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let root = json_body(created).await;
        assert_eq!(root["content"], "Nice post");
        let root_id = root["id"].as_i64().unwrap();

        let reply = send(
            &app,
            "POST",
            "/api/v1/comments",
            Some(&admin),
            Some(json!({ "article_id": article_id, "parent_id": root_id, "content": "Thanks" })),
        )
        .await;
        assert_eq!(reply.status(), StatusCode::CREATED);
        let reply_id = json_body(reply).await["id"].as_i64().unwrap();

        let own = send(
            &app,
            "POST",
            "/api/v1/judgements",
            Some(&reader),
            Some(json!({ "target_type": "comment", "target_id": root_id, "value": "like" })),
        )
        .await;
        assert_eq!(own.status(), StatusCode::BAD_REQUEST);

        let liked = json_body(
            send(
                &app,
                "POST",
                "/api/v1/judgements",
                Some(&reader),
                Some(json!({ "target_type": "comment", "target_id": reply_id, "value": "like" })),
            )
            .await,
        )
        .await;
        assert_eq!(liked["likes"], 1);
        assert_eq!(liked["my_judgement"], "like");

        let tree = json_body(
            send(
                &app,
                "GET",
                &format!("/api/v1/comments?article_id={}", article_id),
                Some(&reader),
                None,
            )
            .await,
        )
        .await;
        assert_eq!(tree["total"], 2);
        let replies = &tree["comments"][0]["replies"];
        assert_eq!(replies[0]["like_count"], 1);
        assert_eq!(replies[0]["my_judgement"], "like");

        let forbidden = send(
            &app,
            "PUT",
            &format!("/api/v1/comments/{}", reply_id),
            Some(&reader),
            Some(json!({ "content": "edited" })),
        )
        .await;
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let deleted = json_body(
            send(&app, "DELETE", &format!("/api/v1/comments/{}", root_id), Some(&admin), None)
                .await,
        )
        .await;
        assert_eq!(deleted["mode"], "soft");

        let thread = json_body(
            send(&app, "GET", &format!("/api/v1/comments/{}", root_id), None, None).await,
        )
        .await;
        assert_eq!(thread["is_deleted"], true);
        assert!(thread["author"].is_null());
        assert!(thread["replies"][0]["my_judgement"].is_null());

        let summary = json_body(
            send(
                &app,
                "GET",
                &format!("/api/v1/judgements/comment/{}", reply_id),
                None,
                None,
            )
            .await,
        )
        .await;
        assert_eq!(summary["score"], 1);
    }

    #[tokio::test]
    async fn test_comment_depth_limit() {
        let app = app().await;
        let token = register(&app, "deep").await;
        let article = json_body(send(&app, "GET", "/api/v1/articles/posts/hello", None, None).await).await;
        let article_id = article["metadata"]["id"].as_i64().unwrap();

        let mut parent: Option<i64> = None;
        for _ in 0..5 {
            let created = send(
                &app,
                "POST",
                "/api/v1/comments",
                Some(&token),
                Some(json!({ "article_id": article_id, "parent_id": parent, "content": "deeper" })),
            )
            .await;
            assert_eq!(created.status(), StatusCode::CREATED);
            parent = json_body(created).await["id"].as_i64();
        }

        let too_deep = send(
            &app,
            "POST",
            "/api/v1/comments",
            Some(&token),
            Some(json!({ "article_id": article_id, "parent_id": parent, "content": "deeper" })),
        )
        .await;
        assert_eq!(too_deep.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(too_deep).await["error"]["details"]["max_depth"], 5);
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin() {
        let app = app().await;
        let admin = register(&app, "founder").await;
        let member = register(&app, "member").await;

        let anonymous = send(&app, "GET", "/api/v1/admin/users", None, None).await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
        let forbidden = send(&app, "GET", "/api/v1/admin/users", Some(&member), None).await;
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let users = json_body(send(&app, "GET", "/api/v1/admin/users", Some(&admin), None).await).await;
        assert_eq!(users["total"], 2);

        let member_id = users["items"]
            .as_array()
            .unwrap()
            .iter()
            .find(|u| u["username"] == "member")
            .unwrap()["id"]
            .as_i64()
            .unwrap();
        let banned = send(
            &app,
            "PUT",
            &format!("/api/v1/admin/users/{}/status", member_id),
            Some(&admin),
            Some(json!({ "status": "banned" })),
        )
        .await;
        assert_eq!(banned.status(), StatusCode::OK);
        let revoked = send(&app, "GET", "/api/v1/auth/me", Some(&member), None).await;
        assert_eq!(revoked.status(), StatusCode::UNAUTHORIZED);

        let reload = send(&app, "POST", "/api/v1/admin/content/reload", Some(&admin), None).await;
        assert_eq!(reload.status(), StatusCode::OK);
        assert_eq!(json_body(reload).await["total"], 4);

        let stats = json_body(send(&app, "GET", "/api/v1/admin/stats", Some(&admin), None).await).await;
        assert!(stats["total_requests"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_feeds_and_static_fallback() {
        let app = app().await;
        let feed = send(&app, "GET", "/feed.xml", None, None).await;
        assert_eq!(feed.status(), StatusCode::OK);
        assert!(feed.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/rss+xml"));

        let sitemap = send(&app, "GET", "/sitemap.xml", None, None).await;
        let body = to_bytes(sitemap.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("https://scriptorium.test/courses/rust"));

        let robots = send(&app, "GET", "/robots.txt", None, None).await;
        assert_eq!(robots.status(), StatusCode::OK);
    }
}
