//! Audit trail service.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use keystone_bus::EventBus;
use keystone_core::events::{AGGREGATE_USER, DomainEvent, Topic};
use keystone_core::result::AppResult;
use keystone_core::types::id::UserId;
use keystone_database::AuditStore;
use keystone_entity::audit::{AuditEvent, AuditFilter};

use super::handler::AuditHandler;
use super::mapping::audit_action;

/// Topics the audit trail subscribes to.
pub const AUDITED_TOPICS: [Topic; 15] = Topic::ALL;

/// Translates domain events into audit records and queries them back.
#[derive(Clone)]
pub struct AuditTrailService {
    store: Arc<dyn AuditStore>,
}

impl std::fmt::Debug for AuditTrailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrailService").finish()
    }
}

impl AuditTrailService {
    /// Creates a new audit trail service over `store`.
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Subscribe one [`AuditHandler`] per audited topic.
    pub async fn register_audit_handlers(&self, bus: &EventBus) -> AppResult<()> {
        for topic in AUDITED_TOPICS {
            bus.subscribe(topic, Arc::new(AuditHandler::new(self.clone(), topic)))
                .await?;
        }
        info!(topics = AUDITED_TOPICS.len(), "Audit handlers registered");
        Ok(())
    }

    /// Build and persist the audit record for `event`.
    pub async fn record(&self, event: &DomainEvent) -> AppResult<AuditEvent> {
        let audit = build_audit_event(event)?;
        self.store.log_event(&audit).await?;
        debug!(
            event_id = %event.event_id,
            action = %audit.action,
            resource = %audit.resource,
            "Audit event recorded"
        );
        Ok(audit)
    }

    /// Persist an audit record that was not derived from a single event.
    pub async fn log(&self, audit: &AuditEvent) -> AppResult<()> {
        self.store.log_event(audit).await
    }

    /// Records matching `filter`, most recent first.
    pub async fn query(&self, filter: &AuditFilter) -> AppResult<Vec<AuditEvent>> {
        self.store.get_events(filter).await
    }

    /// The most recent `limit` records about one user.
    pub async fn get_user_audit_trail(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> AppResult<Vec<AuditEvent>> {
        self.store
            .get_events(&AuditFilter::for_user(user_id).page(limit, 0))
            .await
    }
}

/// Project a domain event into an audit record.
///
/// The subject user comes from the metadata, falling back to the aggregate
/// id for user aggregates. Details hold the payload fields plus the
/// tracing identifiers and custom metadata entries.
pub fn build_audit_event(event: &DomainEvent) -> AppResult<AuditEvent> {
    let topic = event.event_type();
    let (action, resource) = audit_action(topic);

    let mut audit = AuditEvent::new(topic.as_str(), action, resource)
        .with_resource_id(event.aggregate_id.clone())
        .with_metadata(event.metadata.clone());
    audit.event_id = Some(event.event_id);
    audit.occurred_at = event.occurred_at;
    audit.user_id = subject_user(event);
    audit.details = flatten_details(event)?;
    Ok(audit)
}

fn subject_user(event: &DomainEvent) -> Option<UserId> {
    event.metadata.user_id.or_else(|| {
        if event.aggregate_type == AGGREGATE_USER {
            event.aggregate_id.parse().ok()
        } else {
            None
        }
    })
}

fn flatten_details(event: &DomainEvent) -> AppResult<Map<String, Value>> {
    let mut details = event.payload.to_map()?;
    let meta = &event.metadata;
    for (key, value) in [
        ("correlation_id", &meta.correlation_id),
        ("causation_id", &meta.causation_id),
        ("trace_id", &meta.trace_id),
    ] {
        if let Some(value) = value {
            details.insert(key.to_string(), Value::String(value.clone()));
        }
    }
    for (key, value) in &meta.custom {
        details.insert(key.clone(), value.clone());
    }
    Ok(details)
}

#[cfg(test)]
mod tests {
    use keystone_core::events::{
        AGGREGATE_SESSION, AGGREGATE_SYSTEM, EventMetadata, SystemStarted, UserCreated, UserLoggedOut,
    };
    use keystone_core::types::id::SessionId;
    use keystone_database::memory::MemoryAuditStore;

    use super::*;

    #[test]
    fn test_user_falls_back_to_user_aggregate() {
        let user_id = UserId::new();
        let event = DomainEvent::new(
            user_id.to_string(),
            AGGREGATE_USER,
            UserCreated {
                user_id,
                email: "a@x.com".to_string(),
                name: None,
                status: "active".to_string(),
            },
            EventMetadata::from_source("user")
                .with_correlation_id("req-7")
                .with_custom("tenant", "acme"),
        );
        let audit = build_audit_event(&event).unwrap();
        assert_eq!(audit.user_id, Some(user_id));
        assert_eq!(audit.action, "user_created");
        assert_eq!(audit.event_id, Some(event.event_id));
        assert_eq!(audit.details["email"], "a@x.com");
        assert_eq!(audit.details["correlation_id"], "req-7");
        assert_eq!(audit.details["tenant"], "acme");
        assert!(!audit.details.contains_key("causation_id"));
    }

    #[test]
    fn test_non_user_aggregate_uses_metadata_only() {
        let session_id = SessionId::new();
        let user_id = UserId::new();
        let anonymous = DomainEvent::new(
            session_id.to_string(),
            AGGREGATE_SESSION,
            UserLoggedOut {
                user_id,
                session_id,
            },
            EventMetadata::default(),
        );
        assert_eq!(build_audit_event(&anonymous).unwrap().user_id, None);

        let system = DomainEvent::new(
            "keystone",
            AGGREGATE_SYSTEM,
            SystemStarted {
                version: "1".to_string(),
                components: vec![],
            },
            EventMetadata::default().with_user_id(user_id),
        );
        let audit = build_audit_event(&system).unwrap();
        assert_eq!(audit.user_id, Some(user_id));
        assert_eq!(audit.resource, "system");
    }

    #[tokio::test]
    async fn test_record_and_query_user_trail() {
        let store = MemoryAuditStore::new();
        let service = AuditTrailService::new(Arc::new(store.clone()));
        let user_id = UserId::new();
        for _ in 0..3 {
            let event = DomainEvent::new(
                user_id.to_string(),
                AGGREGATE_USER,
                UserCreated {
                    user_id,
                    email: "a@x.com".to_string(),
                    name: None,
                    status: "active".to_string(),
                },
                EventMetadata::default(),
            );
            service.record(&event).await.unwrap();
        }
        let trail = service.get_user_audit_trail(user_id, 2).await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(store.all().await.len(), 3);
    }
}
