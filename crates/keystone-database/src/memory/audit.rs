//! In-memory audit store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use keystone_core::AppError;
use keystone_core::result::AppResult;
use keystone_entity::audit::{AuditEvent, AuditFilter};

use crate::store::AuditStore;

/// Append-only audit log held in a `Vec`.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditStore {
    events: Arc<RwLock<Vec<AuditEvent>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryAuditStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, simulating an unavailable audit store.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every stored record in insertion order.
    pub async fn all(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    fn check_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::internal("Audit store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn log_event(&self, event: &AuditEvent) -> AppResult<()> {
        self.check_available()?;
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn get_events(&self, filter: &AuditFilter) -> AppResult<Vec<AuditEvent>> {
        self.check_available()?;
        let events = self.events.read().await;
        let mut matched: Vec<&AuditEvent> = events.iter().filter(|e| filter.matches(e)).collect();
        // Stable sort keeps later inserts first among equal timestamps.
        matched.reverse();
        matched.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(matched
            .into_iter()
            .skip(filter.effective_offset() as usize)
            .take(filter.effective_limit() as usize)
            .cloned()
            .collect())
    }
}
