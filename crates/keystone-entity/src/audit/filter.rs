//! Audit query filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keystone_core::types::id::{EventId, UserId};

use super::model::AuditEvent;

/// Default page size for audit queries.
pub const DEFAULT_AUDIT_LIMIT: u32 = 100;

/// Any combination of criteria; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    /// Originating event id.
    pub event_id: Option<EventId>,
    /// Subject user.
    pub user_id: Option<UserId>,
    /// Action verb.
    pub action: Option<String>,
    /// Resource type.
    pub resource: Option<String>,
    /// Resource identifier.
    pub resource_id: Option<String>,
    /// Originating topic.
    pub event_type: Option<String>,
    /// Inclusive lower bound on `occurred_at`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `occurred_at`.
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of records.
    pub limit: Option<u32>,
    /// Records to skip.
    pub offset: Option<u32>,
}

impl AuditFilter {
    /// Filter by subject user.
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    /// Filter by action.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Filter by originating topic.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Restrict to a time range.
    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    /// Set limit and offset.
    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Effective limit.
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_AUDIT_LIMIT)
    }

    /// Effective offset.
    pub fn effective_offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }

    /// Whether `event` satisfies every set criterion.
    pub fn matches(&self, event: &AuditEvent) -> bool {
        fn eq<T: PartialEq>(want: &Option<T>, have: &T) -> bool {
            want.as_ref().is_none_or(|w| w == have)
        }
        fn eq_opt<T: PartialEq>(want: &Option<T>, have: &Option<T>) -> bool {
            want.is_none() || want == have
        }

        eq_opt(&self.event_id, &event.event_id)
            && eq_opt(&self.user_id, &event.user_id)
            && eq(&self.action, &event.action)
            && eq(&self.resource, &event.resource)
            && eq_opt(&self.resource_id, &event.resource_id)
            && eq(&self.event_type, &event.event_type)
            && self.from.is_none_or(|from| event.occurred_at >= from)
            && self.to.is_none_or(|to| event.occurred_at <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_all() {
        let event = AuditEvent::new("user.created", "create", "user");
        assert!(AuditFilter::default().matches(&event));
    }

    #[test]
    fn test_criteria_combine() {
        let user = UserId::new();
        let event = AuditEvent::new("auth.user_logged_in", "login", "session").with_user(user);
        assert!(AuditFilter::for_user(user).with_action("login").matches(&event));
        assert!(!AuditFilter::for_user(user).with_action("logout").matches(&event));
        assert!(!AuditFilter::for_user(UserId::new()).matches(&event));
    }

    #[test]
    fn test_time_range() {
        let event = AuditEvent::new("system.started", "system_start", "system");
        let hour = chrono::Duration::hours(1);
        let now = Utc::now();
        assert!(AuditFilter::default().between(now - hour, now + hour).matches(&event));
        assert!(!AuditFilter::default().between(now + hour, now + hour * 2).matches(&event));
    }
}
