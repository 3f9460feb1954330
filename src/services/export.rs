//! Static JSON export of the content index
//!
//! Writes `<out>/<kind>/<slug>.json` for every visible document and
//! `<out>/index.json` with all summaries, so a static frontend can be built
//! without running the server.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::ArticleSummary;
use crate::services::content::ContentService;

#[derive(Debug, Serialize)]
struct ExportIndex {
    generated_at: String,
    total: usize,
    articles: Vec<ArticleSummary>,
}

/// Files written by [`export_content`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub documents: usize,
    pub index_path: PathBuf,
}

pub fn export_content(content: &ContentService, out_dir: &Path) -> Result<ExportSummary> {
    let articles = content.visible();

    for article in &articles {
        let path = out_dir
            .join(article.kind.as_str())
            .join(format!("{}.json", article.slug));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(article.as_ref())?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let index = ExportIndex {
        generated_at: chrono::Utc::now().to_rfc3339(),
        total: articles.len(),
        articles: articles.iter().map(|a| a.summary_view()).collect(),
    };
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let index_path = out_dir.join("index.json");
    fs::write(&index_path, serde_json::to_vec_pretty(&index)?)
        .with_context(|| format!("Failed to write {}", index_path.display()))?;

    tracing::debug!("Exported {} documents to {}", articles.len(), out_dir.display());
    Ok(ExportSummary {
        documents: articles.len(),
        index_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContentConfig;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_export_writes_documents_and_index() {
        let src = TempDir::new().unwrap();
        write(src.path(), "posts/hello.md", "---\ntitle: Hello\n---\nBody.");
        write(src.path(), "courses/rust/index.md", "---\ntitle: Rust\n---\nCourse.");
        write(src.path(), "courses/rust/basics.md", "---\ntitle: Basics\n---\nOne.");
        write(src.path(), "posts/wip.md", "---\ntitle: WIP\ndraft: true\n---\nLater.");

        let content = ContentService::load(ContentConfig {
            root: src.path().to_path_buf(),
            ..ContentConfig::default()
        })
        .unwrap();

        let out = TempDir::new().unwrap();
        let summary = export_content(&content, out.path()).unwrap();
        assert_eq!(summary.documents, 3);

        let chapter: serde_json::Value = serde_json::from_slice(
            &fs::read(out.path().join("course/rust/basics.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(chapter["title"], "Basics");
        assert_eq!(chapter["course"], "rust");
        assert!(out.path().join("post/hello.json").exists());
        assert!(!out.path().join("post/wip.json").exists());

        let index: serde_json::Value =
            serde_json::from_slice(&fs::read(summary.index_path).unwrap()).unwrap();
        assert_eq!(index["total"], 3);
        assert_eq!(index["articles"].as_array().unwrap().len(), 3);
    }
}
