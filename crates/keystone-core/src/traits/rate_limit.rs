//! Attempt throttling capability.

use async_trait::async_trait;

use crate::result::AppResult;

/// Per-key attempt limiter consumed by the auth service.
///
/// Keys are opaque strings such as `login:a@x.com` or `register:10.0.0.1`.
#[async_trait]
pub trait RateLimiter: Send + Sync + 'static {
    /// Record an attempt for `key` and report whether it is allowed.
    async fn allow(&self, key: &str) -> AppResult<bool>;

    /// Clear the attempt counter for `key`.
    async fn reset(&self, key: &str) -> AppResult<()>;

    /// Number of attempts recorded for `key` in the current window.
    async fn get_attempts(&self, key: &str) -> AppResult<u32>;
}
