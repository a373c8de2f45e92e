//! The closed catalog of event topics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AppError;

/// Every topic an event can be published on.
///
/// Topics travel as dotted strings (`"user.created"`) on the wire and are
/// used as routing keys. Subscriptions are made against this enum, so a
/// misspelled topic cannot be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    // ── User ──
    /// A user account was created.
    UserCreated,
    /// A user profile was updated.
    UserUpdated,
    /// A user account was deleted.
    UserDeleted,
    /// A user's status changed.
    UserStatusChanged,
    /// A user's email address changed.
    UserEmailChanged,
    /// A user account was activated.
    UserActivated,
    /// A user account was deactivated.
    UserDeactivated,

    // ── Auth ──
    /// A user logged in and a session was created.
    UserLoggedIn,
    /// A user logged out and the session was deleted.
    UserLoggedOut,
    /// A user registered and received a first session.
    UserRegistered,
    /// A session was found expired during validation.
    SessionExpired,
    /// A user changed their password.
    PasswordChanged,

    // ── System ──
    /// The system finished starting.
    SystemStarted,
    /// The system is shutting down.
    SystemShuttingDown,
    /// A component failed its health check.
    HealthCheckFailed,
}

impl Topic {
    /// Every topic, in catalog order.
    pub const ALL: [Topic; 15] = [
        Topic::UserCreated,
        Topic::UserUpdated,
        Topic::UserDeleted,
        Topic::UserStatusChanged,
        Topic::UserEmailChanged,
        Topic::UserActivated,
        Topic::UserDeactivated,
        Topic::UserLoggedIn,
        Topic::UserLoggedOut,
        Topic::UserRegistered,
        Topic::SessionExpired,
        Topic::PasswordChanged,
        Topic::SystemStarted,
        Topic::SystemShuttingDown,
        Topic::HealthCheckFailed,
    ];

    /// Returns the dotted wire name of this topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserCreated => "user.created",
            Self::UserUpdated => "user.updated",
            Self::UserDeleted => "user.deleted",
            Self::UserStatusChanged => "user.status_changed",
            Self::UserEmailChanged => "user.email_changed",
            Self::UserActivated => "user.activated",
            Self::UserDeactivated => "user.deactivated",
            Self::UserLoggedIn => "auth.user_logged_in",
            Self::UserLoggedOut => "auth.user_logged_out",
            Self::UserRegistered => "auth.user_registered",
            Self::SessionExpired => "auth.session_expired",
            Self::PasswordChanged => "auth.password_changed",
            Self::SystemStarted => "system.started",
            Self::SystemShuttingDown => "system.shutting_down",
            Self::HealthCheckFailed => "system.health_check_failed",
        }
    }

    /// The module prefix of the topic (`"user"`, `"auth"`, `"system"`).
    pub fn domain(&self) -> &'static str {
        let name = self.as_str();
        match name.find('.') {
            Some(idx) => &name[..idx],
            None => name,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::validation("topic", format!("Unknown event topic: '{s}'")))
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(|e: AppError| serde::de::Error::custom(e.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_topic_parses_back() {
        for topic in Topic::ALL {
            assert_eq!(topic.as_str().parse::<Topic>().unwrap(), topic);
        }
    }

    #[test]
    fn test_unknown_topic_is_rejected() {
        let err = "user.craeted".parse::<Topic>().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("topic"));
    }

    #[test]
    fn test_domain() {
        assert_eq!(Topic::UserDeleted.domain(), "user");
        assert_eq!(Topic::SessionExpired.domain(), "auth");
        assert_eq!(Topic::HealthCheckFailed.domain(), "system");
    }
}
