//! Rate limiting for authentication endpoints
//!
//! Two sliding windows guard login:
//! - requests per client IP (10 per minute)
//! - failed attempts per username (5 per 15 minutes)

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use tokio::sync::RwLock;

/// Counts events per key inside a trailing time window
#[derive(Debug)]
pub struct SlidingWindow<K> {
    limit: usize,
    window: Duration,
    events: RwLock<HashMap<K, Vec<DateTime<Utc>>>>,
}

impl<K: Eq + Hash> SlidingWindow<K> {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            events: RwLock::new(HashMap::new()),
        }
    }

    /// Whether `key` has used up its allowance
    pub async fn is_limited(&self, key: &K) -> bool {
        let cutoff = Utc::now() - self.window;
        let events = self.events.read().await;
        events
            .get(key)
            .map(|times| times.iter().filter(|t| **t > cutoff).count() >= self.limit)
            .unwrap_or(false)
    }

    pub async fn record(&self, key: K) {
        let now = Utc::now();
        let cutoff = now - self.window;
        let mut events = self.events.write().await;
        let times = events.entry(key).or_default();
        times.retain(|t| *t > cutoff);
        times.push(now);
    }

    /// Record an event and report whether the key is now over the limit
    pub async fn hit(&self, key: K) -> bool {
        let now = Utc::now();
        let cutoff = now - self.window;
        let mut events = self.events.write().await;
        let times = events.entry(key).or_default();
        times.retain(|t| *t > cutoff);
        if times.len() >= self.limit {
            return true;
        }
        times.push(now);
        false
    }

    pub async fn clear(&self, key: &K) {
        self.events.write().await.remove(key);
    }

    /// Drop expired events and empty keys; returns the number of keys left
    pub async fn cleanup(&self) -> usize {
        let cutoff = Utc::now() - self.window;
        let mut events = self.events.write().await;
        events.retain(|_, times| {
            times.retain(|t| *t > cutoff);
            !times.is_empty()
        });
        events.len()
    }
}

/// Login rate limiter
#[derive(Debug)]
pub struct LoginRateLimiter {
    ip_requests: SlidingWindow<IpAddr>,
    username_failures: SlidingWindow<String>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self::with_limits(10, Duration::minutes(1), 5, Duration::minutes(15))
    }

    pub fn with_limits(
        ip_limit: usize,
        ip_window: Duration,
        failure_limit: usize,
        failure_window: Duration,
    ) -> Self {
        Self {
            ip_requests: SlidingWindow::new(ip_limit, ip_window),
            username_failures: SlidingWindow::new(failure_limit, failure_window),
        }
    }

    /// Count a request from `ip`; true when the IP is over its limit
    pub async fn check_ip(&self, ip: IpAddr) -> bool {
        self.ip_requests.hit(ip).await
    }

    pub async fn is_username_limited(&self, username: &str) -> bool {
        self.username_failures
            .is_limited(&username.to_lowercase())
            .await
    }

    pub async fn record_failed_attempt(&self, username: &str) {
        self.username_failures.record(username.to_lowercase()).await;
    }

    /// Forget failures after a successful login
    pub async fn clear_username_attempts(&self, username: &str) {
        self.username_failures.clear(&username.to_lowercase()).await;
    }

    pub async fn cleanup(&self) {
        let ips = self.ip_requests.cleanup().await;
        let usernames = self.username_failures.cleanup().await;
        tracing::debug!(
            "Rate limiter cleanup: {} IP(s), {} username(s) tracked",
            ips,
            usernames
        );
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
