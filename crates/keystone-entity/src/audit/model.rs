//! Audit record entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use keystone_core::events::EventMetadata;
use keystone_core::types::id::{AuditEventId, EventId, UserId};

/// An immutable audit record derived from a domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique audit record identifier.
    pub id: AuditEventId,
    /// The domain event this record was derived from, if any.
    pub event_id: Option<EventId>,
    /// Topic of the originating event (e.g. `"user.deleted"`).
    pub event_type: String,
    /// The user the record is about.
    pub user_id: Option<UserId>,
    /// Action verb (e.g. `"login"`, `"bulk_session_cleanup"`).
    pub action: String,
    /// Resource type (e.g. `"session"`, `"user"`).
    pub resource: String,
    /// Resource identifier.
    pub resource_id: Option<String>,
    /// Flattened payload and tracing identifiers.
    pub details: Map<String, Value>,
    /// When the underlying action occurred.
    pub occurred_at: DateTime<Utc>,
    /// Metadata of the originating event.
    pub metadata: EventMetadata,
}

impl AuditEvent {
    /// A record not tied to a published event.
    pub fn new(
        event_type: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            id: AuditEventId::new(),
            event_id: None,
            event_type: event_type.into(),
            user_id: None,
            action: action.into(),
            resource: resource.into(),
            resource_id: None,
            details: Map::new(),
            occurred_at: Utc::now(),
            metadata: EventMetadata::default(),
        }
    }

    /// Set the subject user.
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Set the resource id.
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Add a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Set the metadata.
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}
