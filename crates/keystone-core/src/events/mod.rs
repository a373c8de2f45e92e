//! Domain events exchanged between Keystone modules.
//!
//! Events are published through the event bus and consumed by the audit
//! trail, the session-cleanup handlers and the user lifecycle handler.
//! Inside the process every payload is a typed struct selected by its
//! [`Topic`]; the loosely typed JSON map only exists on the wire
//! ([`RawEvent`]).

pub mod auth;
pub mod metadata;
pub mod system;
pub mod topic;
pub mod user;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::result::AppResult;
use crate::types::id::{EventId, UserId};

pub use auth::{PasswordChanged, SessionExpired, UserLoggedIn, UserLoggedOut, UserRegistered};
pub use metadata::EventMetadata;
pub use system::{HealthCheckFailed, SystemShuttingDown, SystemStarted};
pub use topic::Topic;
pub use user::{
    UserActivated, UserCreated, UserDeactivated, UserDeleted, UserEmailChanged, UserStatusChanged,
    UserUpdated,
};

/// Schema version stamped on newly created events.
pub const SCHEMA_VERSION: u32 = 1;

/// Aggregate type for events about a user account.
pub const AGGREGATE_USER: &str = "user";
/// Aggregate type for events about a session.
pub const AGGREGATE_SESSION: &str = "session";
/// Aggregate type for system events.
pub const AGGREGATE_SYSTEM: &str = "system";

/// Macro to define the payload union with one variant per topic.
macro_rules! define_payloads {
    ($($variant:ident => $topic:ident),* $(,)?) => {
        /// Union of all typed event payloads, one variant per topic.
        #[derive(Debug, Clone, PartialEq)]
        pub enum EventPayload {
            $(
                #[allow(missing_docs)]
                $variant($variant),
            )*
        }

        impl EventPayload {
            /// The topic this payload is published on.
            pub fn topic(&self) -> Topic {
                match self {
                    $(Self::$variant(_) => Topic::$topic,)*
                }
            }

            /// Serialize the payload into the wire key-value map.
            pub fn to_map(&self) -> AppResult<Map<String, Value>> {
                let value = match self {
                    $(Self::$variant(inner) => serde_json::to_value(inner)?,)*
                };
                match value {
                    Value::Object(map) => Ok(map),
                    _ => Err(AppError::internal("event payload did not serialize to a map")),
                }
            }

            /// Decode the wire value for `topic` into its typed payload.
            ///
            /// A value that is not a map, or a map missing the topic's
            /// required fields, is rejected as invalid event data.
            pub fn from_value(topic: Topic, value: Value) -> AppResult<Self> {
                if !value.is_object() {
                    return Err(AppError::invalid_event_data("invalid event data format"));
                }
                let decoded = match topic {
                    $(Topic::$topic => serde_json::from_value(value).map(Self::$variant),)*
                };
                decoded.map_err(|e| {
                    AppError::invalid_event_data(format!(
                        "invalid event data format for '{topic}': {e}"
                    ))
                })
            }
        }

        $(
            impl From<$variant> for EventPayload {
                fn from(payload: $variant) -> Self {
                    Self::$variant(payload)
                }
            }
        )*
    };
}

define_payloads! {
    UserCreated => UserCreated,
    UserUpdated => UserUpdated,
    UserDeleted => UserDeleted,
    UserStatusChanged => UserStatusChanged,
    UserEmailChanged => UserEmailChanged,
    UserActivated => UserActivated,
    UserDeactivated => UserDeactivated,
    UserLoggedIn => UserLoggedIn,
    UserLoggedOut => UserLoggedOut,
    UserRegistered => UserRegistered,
    SessionExpired => SessionExpired,
    PasswordChanged => PasswordChanged,
    SystemStarted => SystemStarted,
    SystemShuttingDown => SystemShuttingDown,
    HealthCheckFailed => HealthCheckFailed,
}

impl EventPayload {
    /// Decode a wire map for `topic`.
    pub fn from_map(topic: Topic, map: Map<String, Value>) -> AppResult<Self> {
        Self::from_value(topic, Value::Object(map))
    }

    /// The user the event is about, when there is one.
    pub fn subject_user(&self) -> Option<UserId> {
        match self {
            Self::UserCreated(p) => Some(p.user_id),
            Self::UserUpdated(p) => Some(p.user_id),
            Self::UserDeleted(p) => Some(p.user_id),
            Self::UserStatusChanged(p) => Some(p.user_id),
            Self::UserEmailChanged(p) => Some(p.user_id),
            Self::UserActivated(p) => Some(p.user_id),
            Self::UserDeactivated(p) => Some(p.user_id),
            Self::UserLoggedIn(p) => Some(p.user_id),
            Self::UserLoggedOut(p) => Some(p.user_id),
            Self::UserRegistered(p) => Some(p.user_id),
            Self::SessionExpired(p) => Some(p.user_id),
            Self::PasswordChanged(p) => Some(p.user_id),
            Self::SystemStarted(_) | Self::SystemShuttingDown(_) | Self::HealthCheckFailed(_) => {
                None
            }
        }
    }
}

/// An immutable record of a state transition.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    /// Unique event ID.
    pub event_id: EventId,
    /// Identity of the aggregate the event is about.
    pub aggregate_id: String,
    /// Type of the aggregate (`"user"`, `"session"`, `"system"`).
    pub aggregate_type: String,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
    /// Payload schema version.
    pub version: u32,
    /// Correlation and provenance data.
    pub metadata: EventMetadata,
    /// The typed payload.
    pub payload: EventPayload,
}

impl DomainEvent {
    /// Create a new domain event; the event type is derived from the payload.
    pub fn new(
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        payload: impl Into<EventPayload>,
        metadata: EventMetadata,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            occurred_at: Utc::now(),
            version: SCHEMA_VERSION,
            metadata,
            payload: payload.into(),
        }
    }

    /// The topic (event type) of this event.
    pub fn event_type(&self) -> Topic {
        self.payload.topic()
    }

    /// Metadata for an event emitted in reaction to this one.
    pub fn caused_by(&self, source: impl Into<String>) -> EventMetadata {
        EventMetadata::caused_by(self, source)
    }

    /// Convert into the wire representation.
    pub fn to_raw(&self) -> AppResult<RawEvent> {
        Ok(RawEvent {
            event_id: self.event_id,
            event_type: self.event_type(),
            aggregate_id: self.aggregate_id.clone(),
            aggregate_type: self.aggregate_type.clone(),
            occurred_at: self.occurred_at,
            version: self.version,
            metadata: self.metadata.clone(),
            data: Value::Object(self.payload.to_map()?),
        })
    }

    /// Decode from the wire representation.
    pub fn from_raw(raw: RawEvent) -> AppResult<Self> {
        let payload = EventPayload::from_value(raw.event_type, raw.data)?;
        Ok(Self {
            event_id: raw.event_id,
            aggregate_id: raw.aggregate_id,
            aggregate_type: raw.aggregate_type,
            occurred_at: raw.occurred_at,
            version: raw.version,
            metadata: raw.metadata,
            payload,
        })
    }
}

/// Wire form of a [`DomainEvent`] with an untyped `data` value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Unique event ID.
    pub event_id: EventId,
    /// Topic string.
    pub event_type: Topic,
    /// Aggregate identity.
    pub aggregate_id: String,
    /// Aggregate type.
    pub aggregate_type: String,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
    /// Payload schema version.
    pub version: u32,
    /// Correlation and provenance data.
    #[serde(default)]
    pub metadata: EventMetadata,
    /// Payload as a key-value map.
    pub data: Value,
}

impl Serialize for DomainEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_raw()
            .map_err(|e| serde::ser::Error::custom(e.message))?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DomainEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawEvent::deserialize(deserializer)?;
        DomainEvent::from_raw(raw).map_err(|e| serde::de::Error::custom(e.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::types::id::SessionId;

    fn logged_in() -> DomainEvent {
        let user_id = UserId::new();
        DomainEvent::new(
            user_id.to_string(),
            AGGREGATE_USER,
            UserLoggedIn {
                user_id,
                session_id: SessionId::new(),
                email: "a@x.com".to_string(),
                ip_address: "10.0.0.1".to_string(),
                user_agent: "curl/8".to_string(),
            },
            EventMetadata::from_source("auth").with_correlation_id("req-1"),
        )
    }

    #[test]
    fn test_event_type_follows_payload() {
        let event = logged_in();
        assert_eq!(event.event_type(), Topic::UserLoggedIn);
        assert_eq!(event.version, SCHEMA_VERSION);
    }

    #[test]
    fn test_wire_shape_uses_data_map() {
        let event = logged_in();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "auth.user_logged_in");
        assert_eq!(json["data"]["email"], "a@x.com");
        assert_eq!(json["metadata"]["correlation_id"], "req-1");
        let back: DomainEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_non_map_payload_is_rejected() {
        let err = EventPayload::from_value(Topic::UserDeleted, Value::String("x".into()))
            .unwrap_err();
        assert!(err.is(ErrorCode::InvalidEventData));
        assert_eq!(err.message, "invalid event data format");
    }

    #[test]
    fn test_payload_missing_fields_is_rejected() {
        let err = EventPayload::from_value(
            Topic::UserStatusChanged,
            serde_json::json!({ "user_id": UserId::new() }),
        )
        .unwrap_err();
        assert!(err.is(ErrorCode::InvalidEventData));
    }

    #[test]
    fn test_caused_by_links_parent() {
        let parent = logged_in();
        let meta = EventMetadata::caused_by(&parent, "workflow");
        assert_eq!(meta.causation_id, Some(parent.event_id.to_string()));
        assert_eq!(meta.correlation_id.as_deref(), Some("req-1"));
        assert_eq!(meta.source, "workflow");
    }
}
