//! Bus handler feeding the audit trail.

use async_trait::async_trait;

use keystone_bus::EventHandler;
use keystone_core::events::{DomainEvent, Topic};
use keystone_core::result::AppResult;

use super::service::AuditTrailService;

/// Records every event of one topic in the audit trail.
///
/// A store failure is returned to the bus so the message is redelivered.
#[derive(Debug, Clone)]
pub struct AuditHandler {
    service: AuditTrailService,
    name: String,
}

impl AuditHandler {
    /// Creates the audit handler for `topic`.
    pub fn new(service: AuditTrailService, topic: Topic) -> Self {
        Self {
            service,
            name: format!("audit:{topic}"),
        }
    }
}

#[async_trait]
impl EventHandler for AuditHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        self.service.record(event).await.map(|_| ())
    }
}
