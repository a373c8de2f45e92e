//! In-memory fixed-window rate limiter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use keystone_core::config::RateLimitConfig;
use keystone_core::result::AppResult;
use keystone_core::traits::RateLimiter;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    attempts: u32,
}

/// Counts attempts per key in fixed windows of `window_seconds`.
///
/// The first attempt opens a window; once `max_attempts` have been made,
/// further attempts are refused until the window elapses or the key is
/// reset. Elapsed windows are purged at most once per window length, so
/// keys that are never reset do not accumulate. Single-node only.
#[derive(Debug, Clone)]
pub struct MemoryRateLimiter {
    windows: Arc<DashMap<String, Window>>,
    last_purge: Arc<Mutex<Instant>>,
    max_attempts: u32,
    window: Duration,
}

impl MemoryRateLimiter {
    /// Creates a limiter from rate-limit configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            last_purge: Arc::new(Mutex::new(Instant::now())),
            max_attempts: config.max_attempts,
            window: Duration::from_secs(config.window_seconds),
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Drop every key whose window has elapsed. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let before = self.windows.len();
        let window = self.window;
        self.windows.retain(|_, w| w.started.elapsed() < window);
        before.saturating_sub(self.windows.len())
    }

    fn maybe_purge(&self, now: Instant) {
        // Contended callers skip; someone else is purging.
        let Ok(mut last) = self.last_purge.try_lock() else {
            return;
        };
        if now.duration_since(*last) < self.window {
            return;
        }
        *last = now;
        drop(last);
        self.purge_expired();
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn allow(&self, key: &str) -> AppResult<bool> {
        let now = Instant::now();
        self.maybe_purge(now);
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            attempts: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                attempts: 0,
            };
        }
        if entry.attempts >= self.max_attempts {
            return Ok(false);
        }
        entry.attempts += 1;
        Ok(true)
    }

    async fn reset(&self, key: &str) -> AppResult<()> {
        self.windows.remove(key);
        Ok(())
    }

    async fn get_attempts(&self, key: &str) -> AppResult<u32> {
        let attempts = self
            .windows
            .get(key)
            .filter(|w| w.started.elapsed() < self.window)
            .map(|w| w.attempts)
            .unwrap_or(0);
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> MemoryRateLimiter {
        MemoryRateLimiter::new(&RateLimitConfig {
            max_attempts: 3,
            window_seconds: 60,
        })
    }

    #[tokio::test]
    async fn test_refuses_after_max_attempts() {
        let limiter = limiter();
        for _ in 0..3 {
            assert!(limiter.allow("login:a@x.com").await.unwrap());
        }
        assert!(!limiter.allow("login:a@x.com").await.unwrap());
        assert_eq!(limiter.get_attempts("login:a@x.com").await.unwrap(), 3);
        // Other keys are independent.
        assert!(limiter.allow("login:b@x.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_clears_key() {
        let limiter = limiter();
        for _ in 0..3 {
            limiter.allow("k").await.unwrap();
        }
        limiter.reset("k").await.unwrap();
        assert_eq!(limiter.get_attempts("k").await.unwrap(), 0);
        assert!(limiter.allow("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_reopens() {
        let limiter = limiter();
        for _ in 0..3 {
            limiter.allow("k").await.unwrap();
        }
        assert!(!limiter.allow("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.get_attempts("k").await.unwrap(), 0);
        assert!(limiter.allow("k").await.unwrap());
        assert_eq!(limiter.get_attempts("k").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_keys_are_purged() {
        let limiter = limiter();
        for i in 0..50 {
            limiter.allow(&format!("login:{i}@x.com")).await.unwrap();
        }
        assert_eq!(limiter.tracked_keys(), 50);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.allow("login:fresh@x.com").await.unwrap());
        assert_eq!(limiter.tracked_keys(), 1);
        assert_eq!(limiter.get_attempts("login:fresh@x.com").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_keeps_open_windows() {
        let limiter = limiter();
        limiter.allow("old").await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.allow("new").await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.get_attempts("new").await.unwrap(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
