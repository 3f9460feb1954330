//! Article model
//!
//! Articles are compiled from markdown files at startup and live in memory.
//! `ArticleMetadata` is the persisted side: counters keyed by kind and slug.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The four families of content on the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Post,
    Course,
    Dictionary,
    Reference,
}

impl ContentKind {
    pub const ALL: [ContentKind; 4] = [
        ContentKind::Post,
        ContentKind::Course,
        ContentKind::Dictionary,
        ContentKind::Reference,
    ];

    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Post => "post",
            ContentKind::Course => "course",
            ContentKind::Dictionary => "dictionary",
            ContentKind::Reference => "reference",
        }
    }

    /// Directory under the content root, also the first route segment
    pub fn dir_name(&self) -> &'static str {
        match self {
            ContentKind::Post => "posts",
            ContentKind::Course => "courses",
            ContentKind::Dictionary => "dictionaries",
            ContentKind::Reference => "references",
        }
    }

    /// Public route of a document of this kind
    pub fn route(&self, slug: &str) -> String {
        format!("/{}/{}", self.dir_name(), slug)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = anyhow::Error;

    /// Accepts both the singular name and the directory name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_lowercase();
        ContentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.dir_name() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid content kind: {}", s))
    }
}

/// Parsed document frontmatter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub draft: bool,
    pub slug: Option<String>,
    /// Chapter position inside a course
    pub order: Option<i64>,
    /// Whether a table of contents is rendered
    pub toc: bool,
    pub summary: Option<String>,
    pub author: Option<String>,
    /// Keys this site does not interpret, passed through to clients
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for Frontmatter {
    fn default() -> Self {
        Self {
            title: None,
            description: None,
            date: None,
            updated: None,
            tags: Vec::new(),
            draft: false,
            slug: None,
            order: None,
            toc: true,
            summary: None,
            author: None,
            extra: BTreeMap::new(),
        }
    }
}

/// One heading in a table of contents, with its nested subheadings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub level: u8,
    pub title: String,
    pub anchor: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TocEntry>,
}

/// A fully compiled document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub kind: ContentKind,
    pub slug: String,
    pub route: String,
    /// Path relative to the content root
    pub source: String,
    pub title: String,
    pub description: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub draft: bool,
    pub author: Option<String>,
    pub order: Option<i64>,
    pub summary: String,
    pub html: String,
    pub toc: Vec<TocEntry>,
    pub word_count: usize,
    pub reading_minutes: usize,
    /// Slug of the owning course for chapters
    pub course: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Article {
    pub fn summary_view(&self) -> ArticleSummary {
        ArticleSummary {
            kind: self.kind,
            slug: self.slug.clone(),
            route: self.route.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            date: self.date,
            updated: self.updated,
            tags: self.tags.clone(),
            summary: self.summary.clone(),
            reading_minutes: self.reading_minutes,
            draft: self.draft,
            course: self.course.clone(),
            order: self.order,
        }
    }

    pub fn link(&self) -> ArticleLink {
        ArticleLink {
            title: self.title.clone(),
            slug: self.slug.clone(),
            route: self.route.clone(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// List view of an article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub kind: ContentKind,
    pub slug: String,
    pub route: String,
    pub title: String,
    pub description: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub summary: String,
    pub reading_minutes: usize,
    pub draft: bool,
    pub course: Option<String>,
    pub order: Option<i64>,
}

/// Previous/next navigation target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleLink {
    pub title: String,
    pub slug: String,
    pub route: String,
}

/// A course: its index document plus ordered chapters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub article: Article,
    pub chapters: Vec<ArticleSummary>,
}

/// Tag with the number of published documents carrying it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub name: String,
    pub count: usize,
}

/// Persisted counters for one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    pub id: i64,
    pub kind: ContentKind,
    pub slug: String,
    pub view_count: i64,
    pub like_count: i64,
    pub dislike_count: i64,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
