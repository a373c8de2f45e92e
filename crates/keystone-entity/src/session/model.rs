//! Session entity model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use keystone_core::config::SessionConfig;
use keystone_core::types::id::{SessionId, UserId};
use keystone_core::{AppError, AppResult};

/// One authenticated client context.
///
/// `expires_at` starts at `created_at + default duration` and can be pushed
/// forward by [`Session::extend`], but never past `max_expires_at`
/// (`created_at + max duration`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// The user this session belongs to.
    pub user_id: UserId,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session expires.
    pub expires_at: DateTime<Utc>,
    /// Hard ceiling for `expires_at`.
    pub max_expires_at: DateTime<Utc>,
    /// IP address recorded at creation.
    pub ip_address: String,
    /// User-Agent recorded at creation.
    pub user_agent: String,
    /// Cleared when the session is invalidated.
    pub active: bool,
    /// Optimistic version counter, bumped on every mutation.
    pub version: i64,
}

impl Session {
    /// Create a session for `user_id`.
    pub fn create(
        user_id: UserId,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
        config: &SessionConfig,
    ) -> AppResult<Self> {
        if user_id.is_nil() {
            return Err(AppError::validation("user_id", "User ID is required"));
        }
        let now = Utc::now();
        let max_expires_at = now + config.max_duration();
        Ok(Self {
            id: SessionId::new(),
            user_id,
            created_at: now,
            expires_at: (now + config.default_duration()).min(max_expires_at),
            max_expires_at,
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            active: true,
            version: 1,
        })
    }

    /// Active and not yet expired.
    pub fn is_valid(&self) -> bool {
        self.active && !self.is_expired()
    }

    /// Whether the expiry time has passed.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Reset expiry to `now + duration`, clamped to `max_expires_at`.
    pub fn extend(&mut self, duration: Duration) {
        self.expires_at = (Utc::now() + duration).min(self.max_expires_at);
        self.version += 1;
    }

    /// Mark the session unusable.
    pub fn invalidate(&mut self) {
        self.active = false;
        self.version += 1;
    }

    /// Compare the stored fingerprint with the supplied one.
    ///
    /// Returns `false` when a stored value is non-empty and differs from
    /// the supplied value. Callers decide whether a mismatch is a silent
    /// invalidation or an error.
    pub fn validate_security_context(&self, ip_address: &str, user_agent: &str) -> bool {
        if !self.ip_address.is_empty() && self.ip_address != ip_address {
            return false;
        }
        if !self.user_agent.is_empty() && self.user_agent != user_agent {
            return false;
        }
        true
    }

    /// Time left before expiry, zero when expired.
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).max(Duration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            default_duration_minutes: 60,
            max_duration_hours: 2,
            cleanup_interval_minutes: 15,
        }
    }

    #[test]
    fn test_create_sets_expiry_from_config() {
        let s = Session::create(UserId::new(), "10.0.0.1", "ua", &config()).unwrap();
        assert_eq!(s.expires_at - s.created_at, Duration::minutes(60));
        assert_eq!(s.max_expires_at - s.created_at, Duration::hours(2));
        assert!(s.is_valid());
        assert_eq!(s.version, 1);
    }

    #[test]
    fn test_create_rejects_empty_user() {
        let err = Session::create(UserId::nil(), "", "", &config()).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("user_id"));
    }

    #[test]
    fn test_extend_never_passes_max() {
        let mut s = Session::create(UserId::new(), "", "", &config()).unwrap();
        s.extend(Duration::days(30));
        assert_eq!(s.expires_at, s.max_expires_at);
        s.extend(Duration::minutes(10));
        assert!(s.expires_at <= s.created_at + Duration::hours(2));
        assert_eq!(s.version, 3);
    }

    #[test]
    fn test_inactive_is_never_valid() {
        let mut s = Session::create(UserId::new(), "", "", &config()).unwrap();
        s.expires_at = Utc::now() + Duration::days(1);
        s.invalidate();
        assert!(!s.is_valid());
        assert!(!s.is_expired());
    }

    #[test]
    fn test_expired_session() {
        let mut s = Session::create(UserId::new(), "", "", &config()).unwrap();
        s.expires_at = Utc::now() - Duration::seconds(1);
        assert!(s.is_expired());
        assert!(!s.is_valid());
        assert_eq!(s.remaining(), Duration::zero());
    }

    #[test]
    fn test_security_context() {
        let s = Session::create(UserId::new(), "10.0.0.1", "firefox", &config()).unwrap();
        assert!(s.validate_security_context("10.0.0.1", "firefox"));
        assert!(!s.validate_security_context("10.0.0.2", "firefox"));
        assert!(!s.validate_security_context("10.0.0.1", "curl"));

        let blank = Session::create(UserId::new(), "", "", &config()).unwrap();
        assert!(blank.validate_security_context("1.2.3.4", "anything"));
    }
}
