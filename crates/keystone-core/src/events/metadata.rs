//! Tracing and provenance metadata attached to every event.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::id::UserId;

use super::DomainEvent;

/// Correlation, causation and provenance data for an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Identifier shared by every event of one logical operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Identifier of the event that directly caused this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    /// The user who triggered the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// The module that emitted the event.
    #[serde(default)]
    pub source: String,
    /// Distributed trace identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Free-form extra values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, Value>,
}

impl EventMetadata {
    /// Metadata stamped with the emitting module.
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Metadata for an event emitted in reaction to `parent`.
    ///
    /// The correlation id is inherited (or started from the parent's id) and
    /// the causation id points at the parent.
    pub fn caused_by(parent: &DomainEvent, source: impl Into<String>) -> Self {
        let parent_id = parent.event_id.to_string();
        Self {
            correlation_id: Some(
                parent
                    .metadata
                    .correlation_id
                    .clone()
                    .unwrap_or_else(|| parent_id.clone()),
            ),
            causation_id: Some(parent_id),
            user_id: parent.metadata.user_id,
            source: source.into(),
            trace_id: parent.metadata.trace_id.clone(),
            custom: BTreeMap::new(),
        }
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the causation id.
    pub fn with_causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    /// Set the triggering user.
    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Set the trace id.
    pub fn with_trace_id(mut self, id: impl Into<String>) -> Self {
        self.trace_id = Some(id.into());
        self
    }

    /// Add a custom value.
    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }
}
