//! RSS feed and sitemap
//!
//! Both documents are rendered with Tera from templates embedded in the
//! binary, then cached until the content index is reloaded.

use anyhow::Context;
use rust_embed::RustEmbed;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tera::{Context as TeraContext, Tera, Value};

use crate::cache::{Cache, CacheLayer};
use crate::models::{Article, ContentKind};
use crate::services::content::ContentService;
use crate::services::markdown::html_escape;

const FEED_TEMPLATE: &str = "feed.xml";
const SITEMAP_TEMPLATE: &str = "sitemap.xml";
const CACHE_KEY_FEED: &str = "feed:rss";
const CACHE_KEY_SITEMAP: &str = "feed:sitemap";
const CACHE_PATTERN: &str = "feed:*";

#[derive(RustEmbed)]
#[folder = "templates/"]
#[include = "*.xml"]
struct FeedTemplates;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct SiteInfo<'a> {
    title: &'a str,
    url: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct FeedItem {
    title: String,
    link: String,
    description: String,
    pub_date: Option<String>,
    author: Option<String>,
    categories: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SitemapEntry {
    loc: String,
    lastmod: Option<String>,
}

pub struct FeedService {
    content: Arc<ContentService>,
    cache: Cache,
    tera: Tera,
}

impl FeedService {
    pub fn new(content: Arc<ContentService>, cache: Cache) -> Result<Self, FeedError> {
        Ok(Self {
            content,
            cache,
            tera: load_templates()?,
        })
    }

    /// RSS 2.0 feed of the newest posts
    pub async fn rss(&self) -> Result<String, FeedError> {
        if let Ok(Some(xml)) = self.cache.get::<String>(CACHE_KEY_FEED).await {
            return Ok(xml);
        }

        let config = self.content.config();
        let site_url = base_url(&config.site_url);
        let items: Vec<FeedItem> = self
            .content
            .published()
            .iter()
            .filter(|a| a.kind == ContentKind::Post)
            .take(config.feed_limit)
            .map(|a| feed_item(a, site_url, config.author.as_deref()))
            .collect();

        let mut context = TeraContext::new();
        context.insert("site", &self.site_info());
        context.insert("built_at", &chrono::Utc::now().to_rfc2822());
        context.insert("items", &items);

        let xml = self.tera.render(FEED_TEMPLATE, &context)?;
        tracing::debug!("Rendered RSS feed with {} item(s)", items.len());
        Ok(self.store(CACHE_KEY_FEED, xml).await)
    }

    /// Sitemap of every published document route
    pub async fn sitemap(&self) -> Result<String, FeedError> {
        if let Ok(Some(xml)) = self.cache.get::<String>(CACHE_KEY_SITEMAP).await {
            return Ok(xml);
        }

        let site_url = base_url(&self.content.config().site_url).to_string();
        let entries: Vec<SitemapEntry> = self
            .content
            .published()
            .iter()
            .map(|a| SitemapEntry {
                loc: format!("{}{}", site_url, a.route),
                lastmod: a
                    .updated
                    .or(a.date)
                    .map(|d| d.format("%Y-%m-%d").to_string()),
            })
            .collect();

        let mut context = TeraContext::new();
        context.insert("site", &self.site_info());
        context.insert("entries", &entries);

        let xml = self.tera.render(SITEMAP_TEMPLATE, &context)?;
        Ok(self.store(CACHE_KEY_SITEMAP, xml).await)
    }

    /// Forget rendered documents (after a content reload)
    pub async fn invalidate(&self) {
        if let Err(e) = self.cache.delete_pattern(CACHE_PATTERN).await {
            tracing::warn!("Failed to invalidate feeds: {}", e);
        }
    }

    fn site_info(&self) -> SiteInfo<'_> {
        let config = self.content.config();
        SiteInfo {
            title: &config.site_title,
            url: base_url(&config.site_url),
            description: &config.site_description,
        }
    }

    async fn store(&self, key: &str, xml: String) -> String {
        if let Err(e) = self.cache.set(key, &xml, self.cache.default_ttl()).await {
            tracing::warn!("Failed to cache {}: {}", key, e);
        }
        xml
    }
}

fn base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

fn feed_item(article: &Article, site_url: &str, default_author: Option<&str>) -> FeedItem {
    FeedItem {
        title: article.title.clone(),
        link: format!("{}{}", site_url, article.route),
        description: article
            .description
            .clone()
            .unwrap_or_else(|| article.summary.clone()),
        pub_date: article.date.map(|d| d.to_rfc2822()),
        author: article
            .author
            .clone()
            .or_else(|| default_author.map(str::to_string)),
        categories: article.tags.clone(),
    }
}

/// Escape a value for XML text and attributes
fn xml_filter(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    let escaped = match value {
        Value::String(s) => html_escape(s),
        Value::Null => String::new(),
        other => html_escape(&other.to_string()),
    };
    Ok(Value::String(escaped))
}

fn load_templates() -> Result<Tera, FeedError> {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.register_filter("xml", xml_filter);

    for name in [FEED_TEMPLATE, SITEMAP_TEMPLATE] {
        let file = FeedTemplates::get(name)
            .with_context(|| format!("Embedded template missing: {}", name))?;
        let source = std::str::from_utf8(file.data.as_ref())
            .with_context(|| format!("Template is not UTF-8: {}", name))?;
        tera.add_raw_template(name, source)?;
    }
    Ok(tera)
}
