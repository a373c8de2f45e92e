//! Session lifetime configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Session lifetime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lifetime of a new or extended session in minutes.
    #[serde(default = "default_duration")]
    pub default_duration_minutes: u64,
    /// Hard ceiling on a session's lifetime, measured from creation, in hours.
    #[serde(default = "default_max_duration")]
    pub max_duration_hours: u64,
    /// Interval for the expired session sweep in minutes.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_minutes: u64,
}

impl SessionConfig {
    /// Default lifetime as a duration.
    pub fn default_duration(&self) -> Duration {
        Duration::minutes(self.default_duration_minutes as i64)
    }

    /// Maximum lifetime as a duration.
    pub fn max_duration(&self) -> Duration {
        Duration::hours(self.max_duration_hours as i64)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_duration_minutes: default_duration(),
            max_duration_hours: default_max_duration(),
            cleanup_interval_minutes: default_cleanup_interval(),
        }
    }
}

fn default_duration() -> u64 {
    24 * 60
}

fn default_max_duration() -> u64 {
    7 * 24
}

fn default_cleanup_interval() -> u64 {
    15
}
