//! Per-client request counting over fixed windows.
//!
//! The limiter fails open: when no store is configured, or the store errors,
//! the request is allowed and a warning is logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::ApiConfig;

/// Entries beyond this trigger a sweep of expired windows.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Error)]
pub enum RateLimitStoreError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of one atomic check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub allowed: bool,
    /// Requests counted in the current window, including this one if allowed.
    pub count: u32,
    /// Unix timestamp (seconds) at which the window resets.
    pub reset_at: i64,
}

/// Shared counter backend. Implementations must make `hit` atomic per key so
/// concurrent requests can never push a count past `limit`.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn hit(&self, key: &str, limit: u32, window: Duration, now: DateTime<Utc>) -> Result<Hit, RateLimitStoreError>;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: i64,
}

/// Process-local store. Suitable for a single instance only.
#[derive(Default)]
pub struct MemoryStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn hit(&self, key: &str, limit: u32, window: Duration, now: DateTime<Utc>) -> Result<Hit, RateLimitStoreError> {
        let now_ts = now.timestamp();
        let mut windows = self.windows.lock().await;

        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, w| w.reset_at > now_ts);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            reset_at: now_ts + window.as_secs() as i64,
        });
        if entry.reset_at <= now_ts {
            *entry = Window { count: 0, reset_at: now_ts + window.as_secs() as i64 };
        }

        if entry.count >= limit {
            return Ok(Hit { allowed: false, count: entry.count, reset_at: entry.reset_at });
        }
        entry.count += 1;
        Ok(Hit { allowed: true, count: entry.count, reset_at: entry.reset_at })
    }
}

/// Result reported to the caller via `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp (seconds) at which the window resets.
    pub reset: i64,
}

impl RateLimitStatus {
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.reset - now.timestamp()).max(1)
    }
}

pub struct RateLimiter {
    store: Option<Arc<dyn RateLimitStore>>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Option<Arc<dyn RateLimitStore>>, limit: u32, window: Duration) -> Self {
        Self { store, limit, window }
    }

    /// In-memory store when rate limiting is enabled, no store otherwise.
    pub fn from_config(config: &ApiConfig) -> Self {
        let store: Option<Arc<dyn RateLimitStore>> = if config.enable_rate_limiting {
            Some(Arc::new(MemoryStore::new()))
        } else {
            None
        };
        Self::new(store, config.rate_limit_requests, Duration::from_secs(config.rate_limit_window_secs))
    }

    pub async fn check(&self, client_id: &str) -> RateLimitStatus {
        self.check_at(client_id, Utc::now()).await
    }

    pub async fn check_at(&self, client_id: &str, now: DateTime<Utc>) -> RateLimitStatus {
        let open = RateLimitStatus {
            allowed: true,
            limit: self.limit,
            remaining: self.limit,
            reset: now.timestamp() + self.window.as_secs() as i64,
        };

        let Some(store) = &self.store else {
            return open;
        };

        match store.hit(client_id, self.limit, self.window, now).await {
            Ok(hit) => RateLimitStatus {
                allowed: hit.allowed,
                limit: self.limit,
                remaining: if hit.allowed { self.limit.saturating_sub(hit.count) } else { 0 },
                reset: hit.reset_at,
            },
            Err(e) => {
                tracing::warn!("Rate limit store failed, allowing request for {}: {}", client_id, e);
                open
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct BrokenStore;

    #[async_trait]
    impl RateLimitStore for BrokenStore {
        async fn hit(&self, _: &str, _: u32, _: Duration, _: DateTime<Utc>) -> Result<Hit, RateLimitStoreError> {
            Err(RateLimitStoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn limiter(limit: u32) -> RateLimiter {
        RateLimiter::new(Some(Arc::new(MemoryStore::new())), limit, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn counts_down_then_denies() {
        let limiter = limiter(3);
        let remaining: Vec<u32> = vec![
            limiter.check_at("u1", at(0)).await.remaining,
            limiter.check_at("u1", at(1)).await.remaining,
            limiter.check_at("u1", at(2)).await.remaining,
        ];
        assert_eq!(remaining, vec![2, 1, 0]);

        let denied = limiter.check_at("u1", at(3)).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset, at(60).timestamp());
    }

    #[tokio::test]
    async fn window_resets() {
        let limiter = limiter(1);
        assert!(limiter.check_at("u1", at(0)).await.allowed);
        assert!(!limiter.check_at("u1", at(59)).await.allowed);
        let fresh = limiter.check_at("u1", at(60)).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.reset, at(120).timestamp());
    }

    #[tokio::test]
    async fn clients_are_independent() {
        let limiter = limiter(1);
        assert!(limiter.check_at("u1", at(0)).await.allowed);
        assert!(limiter.check_at("u2", at(0)).await.allowed);
        assert!(!limiter.check_at("u1", at(0)).await.allowed);
    }

    #[tokio::test]
    async fn missing_store_fails_open() {
        let limiter = RateLimiter::new(None, 1, Duration::from_secs(60));
        for _ in 0..5 {
            assert!(limiter.check("u1").await.allowed);
        }
    }

    #[tokio::test]
    async fn broken_store_fails_open() {
        let limiter = RateLimiter::new(Some(Arc::new(BrokenStore)), 1, Duration::from_secs(60));
        let status = limiter.check("u1").await;
        assert!(status.allowed);
        assert_eq!(status.remaining, 1);
    }

    #[tokio::test]
    async fn concurrent_hits_never_exceed_limit() {
        let limiter = Arc::new(limiter(10));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.check_at("shared", at(0)).await.allowed }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let status = RateLimitStatus { allowed: false, limit: 1, remaining: 0, reset: at(0).timestamp() };
        assert_eq!(status.retry_after_secs(at(5)), 1);
        assert_eq!(status.retry_after_secs(at(-30)), 30);
    }
}
