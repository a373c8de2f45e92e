//! System-level event payloads.

use serde::{Deserialize, Serialize};

/// The system finished starting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStarted {
    /// Version string.
    pub version: String,
    /// Components that were brought up.
    #[serde(default)]
    pub components: Vec<String>,
}

/// The system is shutting down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemShuttingDown {
    /// Reason for shutdown.
    pub reason: String,
}

/// A component failed its health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckFailed {
    /// The failing component.
    pub component: String,
    /// The failure reported.
    pub error: String,
}
