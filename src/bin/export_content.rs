//! CLI tool to export the compiled content index as static JSON.
//!
//! Usage: `cargo run --bin export-content [OUT_DIR]`
//!
//! Reads the same configuration as the server and writes to `dist/content`
//! unless an output directory is given.

use anyhow::Result;
use std::path::PathBuf;

use scriptorium::config::Config;
use scriptorium::services::{export::export_content, ContentService};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scriptorium=info".into()),
        )
        .init();

    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("dist/content"));

    let config = Config::load_with_env(&Config::default_path())?;
    let content = ContentService::load(config.content)?;
    let summary = export_content(&content, &out_dir)?;

    println!(
        "Exported {} documents to {} (index: {})",
        summary.documents,
        out_dir.display(),
        summary.index_path.display()
    );
    Ok(())
}
