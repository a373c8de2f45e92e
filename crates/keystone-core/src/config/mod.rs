//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section. Components receive the section they need through their
//! constructors; nothing reads configuration from global state.

pub mod auth;
pub mod bus;
pub mod database;
pub mod logging;
pub mod rate_limit;
pub mod session;
pub mod workflow;

use serde::{Deserialize, Serialize};

pub use self::auth::AuthConfig;
pub use self::bus::{BrokerKind, BusConfig};
pub use self::database::{DatabaseBackend, DatabaseConfig};
pub use self::logging::LoggingConfig;
pub use self::rate_limit::RateLimitConfig;
pub use self::session::SessionConfig;
pub use self::workflow::WorkflowConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Session lifetime settings.
    #[serde(default)]
    pub session: SessionConfig,
    /// Credential and password policy settings.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Rate limiter settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Event bus and broker settings.
    #[serde(default)]
    pub bus: BusConfig,
    /// Workflow orchestration settings.
    #[serde(default)]
    pub workflow: WorkflowConfig,
    /// Persistence backend settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges `{dir}/default.toml` with an environment-specific overlay
    /// `{dir}/{env}.toml` and environment variables prefixed with
    /// `KEYSTONE__` (e.g. `KEYSTONE__BUS__BROKER=redis`).
    pub fn load(dir: &str, env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(&format!("{dir}/default")).required(false))
            .add_source(config::File::with_name(&format!("{dir}/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("KEYSTONE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let config = AppConfig::load("does/not/exist", "test").expect("defaults");
        assert_eq!(config.session.default_duration_minutes, 1440);
        assert_eq!(config.bus.max_retry, 3);
        assert_eq!(config.bus.broker, BrokerKind::Memory);
        assert_eq!(config.database.backend, DatabaseBackend::Memory);
    }
}
