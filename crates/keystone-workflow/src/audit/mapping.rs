//! Topic to (action, resource) lookup for audit records.

use keystone_core::events::Topic;

/// Action recorded for a topic with no table entry.
pub const DEFAULT_ACTION: &str = "event_occurred";
/// Resource recorded for a topic with no table entry.
pub const DEFAULT_RESOURCE: &str = "unknown";

const AUDIT_ACTIONS: &[(Topic, &str, &str)] = &[
    (Topic::UserCreated, "user_created", "user"),
    (Topic::UserUpdated, "user_updated", "user"),
    (Topic::UserDeleted, "user_deleted", "user"),
    (Topic::UserStatusChanged, "user_status_changed", "user"),
    (Topic::UserEmailChanged, "user_email_changed", "user"),
    (Topic::UserActivated, "user_activated", "user"),
    (Topic::UserDeactivated, "user_deactivated", "user"),
    (Topic::UserLoggedIn, "login", "session"),
    (Topic::UserLoggedOut, "logout", "session"),
    (Topic::UserRegistered, "register", "user"),
    (Topic::SessionExpired, "session_expired", "session"),
    (Topic::PasswordChanged, "password_changed", "user"),
    (Topic::SystemStarted, "system_started", "system"),
    (Topic::SystemShuttingDown, "system_shutdown", "system"),
    (Topic::HealthCheckFailed, "health_check_failed", "system"),
];

/// The `(action, resource)` pair recorded for `topic`.
///
/// Never fails: topics missing from the table get
/// [`DEFAULT_ACTION`] / [`DEFAULT_RESOURCE`].
pub fn audit_action(topic: Topic) -> (&'static str, &'static str) {
    AUDIT_ACTIONS
        .iter()
        .find(|(t, _, _)| *t == topic)
        .map(|(_, action, resource)| (*action, *resource))
        .unwrap_or((DEFAULT_ACTION, DEFAULT_RESOURCE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_topic_has_an_entry() {
        for topic in Topic::ALL {
            assert_ne!(audit_action(topic).0, DEFAULT_ACTION, "{topic}");
        }
    }

    #[test]
    fn test_known_pairs() {
        assert_eq!(audit_action(Topic::UserLoggedIn), ("login", "session"));
        assert_eq!(audit_action(Topic::UserDeleted), ("user_deleted", "user"));
    }
}
