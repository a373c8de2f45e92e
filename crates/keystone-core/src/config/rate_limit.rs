//! Rate limiter configuration.

use serde::{Deserialize, Serialize};

/// Attempt-counting rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Attempts allowed per key within one window.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Window length in seconds; the counter restarts after it elapses.
    #[serde(default = "default_window")]
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_seconds: default_window(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_window() -> u64 {
    15 * 60
}
