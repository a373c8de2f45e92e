//! Event handler trait.

use async_trait::async_trait;

use keystone_core::events::DomainEvent;
use keystone_core::result::AppResult;

/// A named subscriber to one or more topics.
///
/// Returning an error marks the delivery as failed; the bus redelivers it
/// until the envelope's retry ceiling is reached. Handlers may therefore
/// see the same event more than once.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Unique name used for unsubscription and diagnostics.
    fn name(&self) -> &str;

    /// Process one event.
    async fn handle(&self, event: &DomainEvent) -> AppResult<()>;
}
