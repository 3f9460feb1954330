//! Configuration management
//!
//! Configuration is read from a YAML file (`config.yml` by default) and may be
//! overridden by `SCRIPTORIUM_*` environment variables. Missing values fall back
//! to defaults so an empty or absent file yields a runnable setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file path
pub const CONFIG_PATH_ENV: &str = "SCRIPTORIUM_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub comments: CommentConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (cookies are sent with credentials)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// Directory served as static files for unmatched routes
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            public_dir: default_public_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL or SQLite file path
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/scriptorium.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    #[default]
    Sqlite,
    Mysql,
}

/// In-memory cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry time-to-live in seconds
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// Maximum number of cached entries
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            max_capacity: default_max_capacity(),
        }
    }
}

fn default_ttl() -> u64 {
    3600
}

fn default_max_capacity() -> u64 {
    10_000
}

/// Content pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Root directory holding `posts/`, `courses/`, `dictionaries/`, `references/`
    #[serde(default = "default_content_root")]
    pub root: PathBuf,
    /// Public base URL used in feeds and the sitemap
    #[serde(default = "default_site_url")]
    pub site_url: String,
    #[serde(default = "default_site_title")]
    pub site_title: String,
    #[serde(default)]
    pub site_description: String,
    /// Default author for feed entries
    #[serde(default)]
    pub author: Option<String>,
    /// Maximum summary length in characters
    #[serde(default = "default_summary_length")]
    pub summary_length: usize,
    /// syntect theme used for code highlighting
    #[serde(default = "default_syntax_theme")]
    pub syntax_theme: String,
    /// Number of posts in the RSS feed
    #[serde(default = "default_feed_limit")]
    pub feed_limit: usize,
    /// Serve documents marked `draft: true`
    #[serde(default)]
    pub include_drafts: bool,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            root: default_content_root(),
            site_url: default_site_url(),
            site_title: default_site_title(),
            site_description: String::new(),
            author: None,
            summary_length: default_summary_length(),
            syntax_theme: default_syntax_theme(),
            feed_limit: default_feed_limit(),
            include_drafts: false,
        }
    }
}

fn default_content_root() -> PathBuf {
    PathBuf::from("content")
}

fn default_site_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_site_title() -> String {
    "Scriptorium".to_string()
}

fn default_summary_length() -> usize {
    200
}

fn default_syntax_theme() -> String {
    "base16-ocean.dark".to_string()
}

fn default_feed_limit() -> usize {
    20
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Session lifetime in days
    #[serde(default = "default_session_days")]
    pub session_days: i64,
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
    /// When false only the very first account can be created
    #[serde(default = "default_allow_registration")]
    pub allow_registration: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_days: default_session_days(),
            min_password_length: default_min_password_length(),
            allow_registration: default_allow_registration(),
        }
    }
}

fn default_session_days() -> i64 {
    7
}

fn default_min_password_length() -> usize {
    8
}

fn default_allow_registration() -> bool {
    true
}

/// Comment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentConfig {
    /// Number of nesting levels a thread may have (root comments are level 1)
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum comment length in characters
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

impl Default for CommentConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_length: default_max_length(),
        }
    }
}

/// Hard ceiling for comment nesting
pub const MAX_COMMENT_DEPTH: usize = 5;

fn default_max_depth() -> usize {
    MAX_COMMENT_DEPTH
}

fn default_max_length() -> usize {
    5000
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file.
    ///
    /// A missing or empty file yields the default configuration. Invalid YAML
    /// is reported with its line and column.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, then apply environment overrides.
    ///
    /// Recognised variables: `SCRIPTORIUM_SERVER_HOST`, `SCRIPTORIUM_SERVER_PORT`,
    /// `SCRIPTORIUM_SERVER_CORS_ORIGIN`, `SCRIPTORIUM_DATABASE_DRIVER`,
    /// `SCRIPTORIUM_DATABASE_URL`, `SCRIPTORIUM_CACHE_TTL_SECONDS`,
    /// `SCRIPTORIUM_CONTENT_ROOT`, `SCRIPTORIUM_CONTENT_SITE_URL`,
    /// `SCRIPTORIUM_AUTH_SESSION_DAYS`.
    pub fn load_with_env(path: &Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config path from `SCRIPTORIUM_CONFIG`, defaulting to `config.yml`
    pub fn default_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.yml"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("SCRIPTORIUM_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("SCRIPTORIUM_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("SCRIPTORIUM_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        if let Ok(driver) = std::env::var("SCRIPTORIUM_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("SCRIPTORIUM_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(ttl) = std::env::var("SCRIPTORIUM_CACHE_TTL_SECONDS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.cache.ttl_seconds = ttl;
            }
        }

        if let Ok(root) = std::env::var("SCRIPTORIUM_CONTENT_ROOT") {
            self.content.root = PathBuf::from(root);
        }
        if let Ok(site_url) = std::env::var("SCRIPTORIUM_CONTENT_SITE_URL") {
            self.content.site_url = site_url;
        }

        if let Ok(days) = std::env::var("SCRIPTORIUM_AUTH_SESSION_DAYS") {
            if let Ok(days) = days.parse::<i64>() {
                if days > 0 {
                    self.auth.session_days = days;
                }
            }
        }
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server.port must be non-zero".to_string(),
            ));
        }
        // Browsers refuse credentialed requests against a wildcard origin
        if self.server.cors_origin.trim() == "*" {
            return Err(ConfigError::ValidationError(
                "server.cors_origin must name a single origin, not '*'".to_string(),
            ));
        }
        if self.comments.max_depth == 0 || self.comments.max_depth > MAX_COMMENT_DEPTH {
            return Err(ConfigError::ValidationError(format!(
                "comments.max_depth must be between 1 and {}",
                MAX_COMMENT_DEPTH
            )));
        }
        if self.content.root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "content.root must not be empty".to_string(),
            ));
        }
        if self.auth.session_days <= 0 {
            return Err(ConfigError::ValidationError(
                "auth.session_days must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by every test that touches process environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
