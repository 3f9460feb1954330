//! Cache layer
//!
//! An in-process moka cache holding JSON-serialized values. Services use it
//! for derived data that is costly to rebuild: comment trees and rendered
//! feeds. Keys are namespaced with `:` so whole families can be dropped with
//! a glob pattern.
//!
//! ```rust,ignore
//! let cache = create_cache(&config.cache);
//! cache.set("feed:rss", &xml, cache.default_ttl()).await?;
//! cache.delete_pattern("comments:tree:42:*").await?;
//! ```

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;

pub use memory::MemoryCache;

#[async_trait]
pub trait CacheLayer: Send + Sync {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    /// Store a value; it expires after `ttl` (capped by the cache-wide TTL)
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>;

    /// Delete every key matching a glob (`*` and `?`)
    async fn delete_pattern(&self, pattern: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Cache handle shared by services
pub type Cache = Arc<MemoryCache>;

pub fn create_cache(config: &CacheConfig) -> Cache {
    let ttl = Duration::from_secs(config.ttl_seconds.max(1));
    Arc::new(MemoryCache::with_capacity_and_ttl(config.max_capacity, ttl))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_cache_from_config() {
        let config = CacheConfig {
            ttl_seconds: 1800,
            max_capacity: 50,
        };
        let cache = create_cache(&config);
        assert_eq!(cache.default_ttl(), Duration::from_secs(1800));

        cache
            .set("greeting", &"salve".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        let value: Option<String> = cache.get("greeting").await.unwrap();
        assert_eq!(value.as_deref(), Some("salve"));
    }

    #[test]
    fn test_zero_ttl_is_clamped() {
        let cache = create_cache(&CacheConfig {
            ttl_seconds: 0,
            max_capacity: 10,
        });
        assert_eq!(cache.default_ttl(), Duration::from_secs(1));
    }
}
