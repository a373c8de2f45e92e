//! Retry-tracking wire envelope.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keystone_core::AppError;
use keystone_core::events::DomainEvent;
use keystone_core::result::AppResult;

/// Wraps a [`DomainEvent`] for transport.
///
/// Wire form: `{event, timestamp, retry, max_retry}`. The retry counter is
/// only incremented by the bus delivery loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// The wrapped event.
    pub event: DomainEvent,
    /// When the envelope was created.
    pub timestamp: DateTime<Utc>,
    /// Redeliveries so far.
    pub retry: u32,
    /// Redelivery ceiling.
    pub max_retry: u32,
}

impl EventEnvelope {
    /// Fresh envelope with `retry = 0`.
    pub fn new(event: DomainEvent, max_retry: u32) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
            retry: 0,
            max_retry,
        }
    }

    /// Whether a failed delivery may be redelivered.
    pub fn can_retry(&self) -> bool {
        self.retry < self.max_retry
    }

    /// Copy for the next redelivery.
    pub fn next_attempt(&self) -> Self {
        Self {
            retry: self.retry + 1,
            ..self.clone()
        }
    }

    /// Broker headers for introspection.
    pub fn headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("event_id".to_string(), self.event.event_id.to_string());
        headers.insert("event_type".to_string(), self.event.event_type().to_string());
        headers.insert("aggregate_id".to_string(), self.event.aggregate_id.clone());
        headers.insert("aggregate_type".to_string(), self.event.aggregate_type.clone());
        if let Some(correlation_id) = &self.event.metadata.correlation_id {
            headers.insert("correlation_id".to_string(), correlation_id.clone());
        }
        headers
    }

    /// Serialize to JSON bytes.
    pub fn encode(&self) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes.
    pub fn decode(body: &[u8]) -> AppResult<Self> {
        serde_json::from_slice(body)
            .map_err(|e| AppError::invalid_event_data(format!("Failed to decode envelope: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use keystone_core::events::{AGGREGATE_SYSTEM, EventMetadata, SystemStarted};

    use super::*;

    fn envelope() -> EventEnvelope {
        let event = DomainEvent::new(
            "keystone",
            AGGREGATE_SYSTEM,
            SystemStarted {
                version: "0.1.0".to_string(),
                components: vec!["bus".to_string()],
            },
            EventMetadata::from_source("test").with_correlation_id("c-1"),
        );
        EventEnvelope::new(event, 3)
    }

    #[test]
    fn test_retry_ceiling() {
        let mut env = envelope();
        let mut attempts = 0;
        while env.can_retry() {
            env = env.next_attempt();
            attempts += 1;
        }
        assert_eq!(attempts, 3);
        assert_eq!(env.retry, 3);
    }

    #[test]
    fn test_wire_shape() {
        let env = envelope();
        let json: serde_json::Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(json["retry"], 0);
        assert_eq!(json["max_retry"], 3);
        assert_eq!(json["event"]["event_type"], "system.started");
        assert_eq!(json["event"]["data"]["components"][0], "bus");
        assert_eq!(EventEnvelope::decode(&env.encode().unwrap()).unwrap(), env);
    }

    #[test]
    fn test_headers() {
        let headers = envelope().headers();
        assert_eq!(headers["event_type"], "system.started");
        assert_eq!(headers["aggregate_type"], "system");
        assert_eq!(headers["correlation_id"], "c-1");
    }

    #[test]
    fn test_decode_garbage() {
        assert!(EventEnvelope::decode(b"not json").is_err());
    }
}
