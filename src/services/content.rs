//! Content index service
//!
//! Scans the content root once, compiles every markdown/MDX document and keeps
//! the result in memory. Lookups read a snapshot of the index; a reload builds
//! a new index off to the side and swaps it in whole.
//!
//! Layout under the content root:
//!
//! ```text
//! posts/hello.md              -> /posts/hello
//! courses/rust/index.md       -> /courses/rust        (course index)
//! courses/rust/ownership.mdx  -> /courses/rust/ownership (chapter)
//! dictionaries/...            -> /dictionaries/...
//! references/...              -> /references/...
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::config::ContentConfig;
use crate::models::{
    Article, ArticleLink, ArticleSummary, ContentKind, Course, ListParams, PagedResult, TagCount,
};
use crate::services::frontmatter::{self, ParsedDocument};
use crate::services::markdown::{summarize, LinkMap, MarkdownRenderer, RenderOptions};

const MAX_SEARCH_RESULTS: usize = 50;

/// Error types for content operations
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Invalid content kind: {0}")]
    InvalidKind(String),

    #[error("Failed to read content: {0}")]
    Io(#[from] std::io::Error),
}

/// Filters for [`ContentService::list`]
#[derive(Debug, Clone, Default)]
pub struct ContentQuery {
    pub kind: Option<ContentKind>,
    pub tag: Option<String>,
}

/// Previous and next chapter of a course chapter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Neighbors {
    pub prev: Option<ArticleLink>,
    pub next: Option<ArticleLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentStats {
    pub total: usize,
    pub drafts: usize,
    pub kinds: BTreeMap<ContentKind, usize>,
    pub tags: usize,
    /// Documents skipped during the last load
    pub skipped: usize,
    pub loaded_at: DateTime<Utc>,
}

/// Compiled documents, newest first
#[derive(Debug)]
struct ContentIndex {
    articles: Vec<Arc<Article>>,
    by_route: HashMap<(ContentKind, String), usize>,
    skipped: usize,
    loaded_at: DateTime<Utc>,
}

impl ContentIndex {
    fn empty() -> Self {
        Self {
            articles: Vec::new(),
            by_route: HashMap::new(),
            skipped: 0,
            loaded_at: Utc::now(),
        }
    }

    fn find(&self, kind: ContentKind, slug: &str) -> Option<&Arc<Article>> {
        self.by_route
            .get(&(kind, slug.to_string()))
            .and_then(|i| self.articles.get(*i))
    }
}

/// A discovered file, parsed but not yet rendered
struct SourceDocument {
    kind: ContentKind,
    /// Path relative to the content root, `/`-separated
    source: String,
    /// Directory relative to the kind directory
    dir: String,
    stem: String,
    is_index: bool,
    is_mdx: bool,
    slug: String,
    parsed: ParsedDocument,
}

pub struct ContentService {
    config: ContentConfig,
    renderer: MarkdownRenderer,
    index: RwLock<Arc<ContentIndex>>,
}

impl std::fmt::Debug for ContentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentService")
            .field("root", &self.config.root)
            .field("documents", &self.snapshot().articles.len())
            .finish()
    }
}

impl ContentService {
    /// Create a service with an empty index
    pub fn new(config: ContentConfig) -> Self {
        let renderer = MarkdownRenderer::with_theme(&config.syntax_theme);
        Self {
            config,
            renderer,
            index: RwLock::new(Arc::new(ContentIndex::empty())),
        }
    }

    /// Create a service and load the content root
    pub fn load(config: ContentConfig) -> Result<Self, ContentError> {
        let service = Self::new(config);
        service.reload()?;
        Ok(service)
    }

    pub fn config(&self) -> &ContentConfig {
        &self.config
    }

    fn snapshot(&self) -> Arc<ContentIndex> {
        self.index
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Rescan the content root and replace the index.
    pub fn reload(&self) -> Result<ContentStats, ContentError> {
        let started = std::time::Instant::now();
        let index = self.build_index()?;

        *self
            .index
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(index);

        let stats = self.stats();
        tracing::info!(
            "Content loaded: {} document(s), {} skipped in {:?}",
            stats.total,
            stats.skipped,
            started.elapsed()
        );
        Ok(stats)
    }

    fn is_visible(&self, article: &Article) -> bool {
        self.config.include_drafts || !article.draft
    }

    /// Documents visible to readers, newest first
    pub fn visible(&self) -> Vec<Arc<Article>> {
        self.snapshot()
            .articles
            .iter()
            .filter(|a| self.is_visible(a))
            .cloned()
            .collect()
    }

    /// Non-draft documents regardless of configuration, newest first
    pub fn published(&self) -> Vec<Arc<Article>> {
        self.snapshot()
            .articles
            .iter()
            .filter(|a| !a.draft)
            .cloned()
            .collect()
    }

    pub fn list(&self, query: &ContentQuery, params: &ListParams) -> PagedResult<ArticleSummary> {
        let index = self.snapshot();
        let matching: Vec<ArticleSummary> = index
            .articles
            .iter()
            .filter(|a| self.is_visible(a))
            .filter(|a| query.kind.map_or(true, |kind| a.kind == kind))
            .filter(|a| query.tag.as_deref().map_or(true, |tag| a.has_tag(tag)))
            .map(|a| a.summary_view())
            .collect();
        params.paginate(&matching)
    }

    pub fn get(&self, kind: ContentKind, slug: &str) -> Result<Arc<Article>, ContentError> {
        let slug = slug.trim_matches('/');
        self.snapshot()
            .find(kind, slug)
            .filter(|a| self.is_visible(a))
            .cloned()
            .ok_or_else(|| ContentError::NotFound(kind.route(slug)))
    }

    /// A course index document together with its chapters in reading order
    pub fn course(&self, slug: &str) -> Result<Course, ContentError> {
        let slug = slug.trim_matches('/');
        let index = self.snapshot();
        let article = index
            .find(ContentKind::Course, slug)
            .filter(|a| a.course.is_none() && self.is_visible(a))
            .ok_or_else(|| ContentError::NotFound(ContentKind::Course.route(slug)))?;

        let chapters = self
            .chapters(&index, slug)
            .into_iter()
            .map(|a| a.summary_view())
            .collect();

        Ok(Course {
            article: Article::clone(article),
            chapters,
        })
    }

    fn chapters(&self, index: &ContentIndex, course: &str) -> Vec<Arc<Article>> {
        let mut chapters: Vec<Arc<Article>> = index
            .articles
            .iter()
            .filter(|a| a.course.as_deref() == Some(course) && self.is_visible(a))
            .cloned()
            .collect();
        chapters.sort_by(|a, b| chapter_order(a, b));
        chapters
    }

    /// Previous and next chapters of a course chapter; empty for anything else
    pub fn neighbors(&self, article: &Article) -> Neighbors {
        let Some(course) = article.course.as_deref() else {
            return Neighbors::default();
        };
        let index = self.snapshot();
        let chapters = self.chapters(&index, course);
        let Some(position) = chapters.iter().position(|c| c.slug == article.slug) else {
            return Neighbors::default();
        };

        Neighbors {
            prev: position
                .checked_sub(1)
                .and_then(|i| chapters.get(i))
                .map(|a| a.link()),
            next: chapters.get(position + 1).map(|a| a.link()),
        }
    }

    /// Tag counts over published documents, most used first.
    ///
    /// Drafts never contribute, even when `include_drafts` makes them routable.
    pub fn tags(&self) -> Vec<TagCount> {
        let index = self.snapshot();
        // Grouped case-insensitively; the first spelling seen wins
        let mut counts: HashMap<String, TagCount> = HashMap::new();
        for article in index.articles.iter().filter(|a| !a.draft) {
            for tag in &article.tags {
                counts
                    .entry(tag.to_lowercase())
                    .or_insert_with(|| TagCount {
                        name: tag.clone(),
                        count: 0,
                    })
                    .count += 1;
            }
        }

        let mut tags: Vec<TagCount> = counts.into_values().collect();
        tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        tags
    }

    /// Case-insensitive search over title, description, tags and summary.
    ///
    /// Title matches come first; otherwise results keep index order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<ArticleSummary> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let limit = limit.clamp(1, MAX_SEARCH_RESULTS);

        let index = self.snapshot();
        let mut title_hits = Vec::new();
        let mut other_hits = Vec::new();
        for article in index.articles.iter().filter(|a| self.is_visible(a)) {
            if article.title.to_lowercase().contains(&needle) {
                title_hits.push(article.summary_view());
            } else if article
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
                || article.tags.iter().any(|t| t.to_lowercase().contains(&needle))
                || article.summary.to_lowercase().contains(&needle)
            {
                other_hits.push(article.summary_view());
            }
        }

        title_hits.extend(other_hits);
        title_hits.truncate(limit);
        title_hits
    }

    pub fn stats(&self) -> ContentStats {
        let index = self.snapshot();
        let visible: Vec<&Arc<Article>> =
            index.articles.iter().filter(|a| self.is_visible(a)).collect();

        let mut kinds: BTreeMap<ContentKind, usize> =
            ContentKind::ALL.iter().map(|kind| (*kind, 0)).collect();
        for article in &visible {
            *kinds.entry(article.kind).or_insert(0) += 1;
        }

        ContentStats {
            total: visible.len(),
            drafts: index.articles.iter().filter(|a| a.draft).count(),
            kinds,
            tags: self.tags().len(),
            skipped: index.skipped,
            loaded_at: index.loaded_at,
        }
    }

    fn build_index(&self) -> Result<ContentIndex, ContentError> {
        let root = &self.config.root;
        if !root.is_dir() {
            tracing::warn!("Content root {} does not exist, serving no documents", root.display());
            return Ok(ContentIndex::empty());
        }

        let mut skipped = 0;
        let mut documents = Vec::new();
        for kind in ContentKind::ALL {
            let kind_dir = root.join(kind.dir_name());
            if !kind_dir.is_dir() {
                continue;
            }
            let mut files = Vec::new();
            collect_files(&kind_dir, &mut files)?;
            files.sort();

            for path in files {
                match read_document(root, &kind_dir, kind, &path) {
                    Ok(document) => documents.push(document),
                    Err(message) => {
                        skipped += 1;
                        tracing::warn!("Skipping {}: {}", path.display(), message);
                    }
                }
            }
        }

        // Course directories with an index document own the other files below them
        let course_dirs: HashMap<String, String> = documents
            .iter()
            .filter(|d| d.kind == ContentKind::Course && d.is_index && !d.dir.is_empty())
            .map(|d| (d.dir.clone(), d.slug.clone()))
            .collect();

        let mut links = LinkMap::new();
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(documents.len());
        for document in documents {
            if !seen.insert((document.kind, document.slug.clone())) {
                skipped += 1;
                tracing::warn!(
                    "Skipping {}: duplicate route {}",
                    document.source,
                    document.kind.route(&document.slug)
                );
                continue;
            }
            links.insert(&document.source, &document.kind.route(&document.slug));
            unique.push(document);
        }

        let mut articles: Vec<Article> = unique
            .into_iter()
            .map(|document| {
                let course = course_of(&document, &course_dirs);
                self.compile(document, course, &links)
            })
            .collect();
        articles.sort_by(newest_first);

        let by_route = articles
            .iter()
            .enumerate()
            .map(|(i, a)| ((a.kind, a.slug.clone()), i))
            .collect();

        Ok(ContentIndex {
            articles: articles.into_iter().map(Arc::new).collect(),
            by_route,
            skipped,
            loaded_at: Utc::now(),
        })
    }

    fn compile(&self, document: SourceDocument, course: Option<String>, links: &LinkMap) -> Article {
        let SourceDocument {
            kind,
            source,
            stem,
            is_mdx,
            slug,
            parsed: ParsedDocument { frontmatter: fm, body },
            ..
        } = document;

        let body = if is_mdx { frontmatter::strip_mdx(&body) } else { body };
        let options = RenderOptions {
            toc: fm.toc,
            summary_length: self.config.summary_length,
            source: Some(&source),
            links: Some(links),
        };
        let rendered = self.renderer.render_document(&body, &options);

        let summary = match fm.summary.as_deref() {
            Some(summary) => summarize(summary, self.config.summary_length),
            None => rendered.summary,
        };
        let title = fm.title.or(rendered.first_heading).unwrap_or(stem);

        Article {
            kind,
            route: kind.route(&slug),
            slug,
            source,
            title,
            description: fm.description,
            date: fm.date,
            updated: fm.updated,
            tags: fm.tags,
            draft: fm.draft,
            author: fm.author.or_else(|| self.config.author.clone()),
            order: fm.order,
            summary,
            html: rendered.html,
            toc: rendered.toc,
            word_count: rendered.word_count,
            reading_minutes: rendered.reading_minutes,
            course,
            extra: fm.extra,
        }
    }
}

/// Recursively collect `.md`/`.mdx` files, skipping hidden entries
fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), ContentError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_dir() {
            if let Err(e) = collect_files(&path, files) {
                tracing::warn!("Skipping directory {}: {}", path.display(), e);
            }
        } else if matches!(
            path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
            Some("md") | Some("mdx")
        ) {
            files.push(path);
        }
    }
    Ok(())
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_document(
    root: &Path,
    kind_dir: &Path,
    kind: ContentKind,
    path: &Path,
) -> Result<SourceDocument, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let parsed = frontmatter::parse(&text).map_err(|e| e.to_string())?;

    let source = to_slash_path(path.strip_prefix(root).map_err(|e| e.to_string())?);
    let within_kind = path.strip_prefix(kind_dir).map_err(|e| e.to_string())?;
    let dir = within_kind.parent().map(to_slash_path).unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let is_index = stem.eq_ignore_ascii_case("index");
    let is_mdx = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("mdx"));

    let derived = derive_slug(&dir, &stem);
    let slug = parsed.frontmatter.slug.clone().unwrap_or(derived);

    // An index file takes its directory's name for the title fallback
    let stem = if is_index && !dir.is_empty() {
        dir.rsplit('/').next().unwrap_or(&dir).to_string()
    } else {
        stem
    };

    Ok(SourceDocument {
        kind,
        source,
        dir,
        stem,
        is_index,
        is_mdx,
        slug,
        parsed,
    })
}

/// Slug from the directory and file stem; a trailing `index` is dropped
fn derive_slug(dir: &str, stem: &str) -> String {
    match (dir.is_empty(), stem.eq_ignore_ascii_case("index")) {
        (true, _) => stem.to_string(),
        (false, true) => dir.to_string(),
        (false, false) => format!("{}/{}", dir, stem),
    }
}

/// Nearest enclosing course directory of a non-index course document
fn course_of(document: &SourceDocument, course_dirs: &HashMap<String, String>) -> Option<String> {
    if document.kind != ContentKind::Course || document.is_index {
        return None;
    }
    let mut dir = document.dir.as_str();
    while !dir.is_empty() {
        if let Some(slug) = course_dirs.get(dir) {
            return Some(slug.clone());
        }
        dir = dir.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("");
    }
    None
}

/// Dated documents newest first, undated last, ties by title
fn newest_first(a: &Article, b: &Article) -> Ordering {
    match (a.date, b.date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.title.cmp(&b.title))
}

/// Chapters by explicit order (unordered last), then slug
fn chapter_order(a: &Article, b: &Article) -> Ordering {
    match (a.order, b.order) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.slug.cmp(&b.slug))
}
