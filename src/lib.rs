//! Scriptorium - a markdown knowledge base and blog server
//!
//! Markdown and MDX documents are compiled into an in-memory content index
//! at startup; accounts, comments and judgements are stored in SQLite or
//! MySQL and served over a JSON API.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
