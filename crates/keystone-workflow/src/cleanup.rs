//! Session cleanup cascaded from user lifecycle events.
//!
//! Each trigger topic has its own handler. A handler resolves the affected
//! user from the typed payload, deletes all of that user's sessions and
//! writes one audit record summarizing the cleanup. Audit failures are
//! logged and swallowed; a session-store failure fails the delivery so
//! the bus retries it.

use std::str::FromStr;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use keystone_auth::AuthService;
use keystone_bus::EventHandler;
use keystone_core::AppError;
use keystone_core::events::{DomainEvent, EventPayload, Topic};
use keystone_core::result::AppResult;
use keystone_core::types::id::UserId;
use keystone_entity::audit::AuditEvent;
use keystone_entity::user::UserStatus;

use crate::audit::AuditTrailService;

const SOURCE: &str = "workflow.session_cleanup";

/// Action recorded for a bulk session cleanup.
pub const CLEANUP_ACTION: &str = "bulk_session_cleanup";

/// What a cleanup handler extracted from its trigger event.
#[derive(Debug, Clone, PartialEq)]
struct CleanupRequest {
    user_id: UserId,
    reason: String,
    actor: Option<UserId>,
    explanation: String,
}

/// Deletes a user's sessions and records the cleanup.
#[derive(Debug, Clone)]
pub struct SessionCleanup {
    auth: AuthService,
    audit: AuditTrailService,
}

impl SessionCleanup {
    /// Creates the shared cleanup routine.
    pub fn new(auth: AuthService, audit: AuditTrailService) -> Self {
        Self { auth, audit }
    }

    async fn run(&self, event: &DomainEvent, request: CleanupRequest) -> AppResult<u64> {
        let existing = self.auth.get_user_sessions(request.user_id).await?;
        if existing.is_empty() {
            debug!(user_id = %request.user_id, "No sessions to clean up");
        }
        let removed = self
            .auth
            .invalidate_user_sessions(request.user_id, &request.reason)
            .await?;

        let mut record = AuditEvent::new(event.event_type().as_str(), CLEANUP_ACTION, "session")
            .with_user(request.user_id)
            .with_resource_id(request.user_id.to_string())
            .with_detail("session_count", removed)
            .with_detail("reason", request.reason.clone())
            .with_detail("explanation", request.explanation)
            .with_metadata(event.caused_by(SOURCE));
        record.event_id = Some(event.event_id);
        if let Some(actor) = request.actor {
            record = record.with_detail("actor", actor.to_string());
        }
        if let Err(e) = self.audit.log(&record).await {
            warn!(
                user_id = %request.user_id,
                error = %e,
                "Failed to record session cleanup audit event"
            );
        }

        info!(
            user_id = %request.user_id,
            topic = %event.event_type(),
            session_count = removed,
            reason = %request.reason,
            "User sessions cleaned up"
        );
        Ok(removed)
    }
}

fn invalid_payload(topic: Topic) -> AppError {
    AppError::invalid_event_data(format!("invalid event data format for '{topic}'"))
}

/// Cleans up sessions when a user becomes inactive or suspended.
#[derive(Debug, Clone)]
pub struct UserStatusChangedHandler {
    cleanup: SessionCleanup,
}

impl UserStatusChangedHandler {
    /// Creates the handler.
    pub fn new(cleanup: SessionCleanup) -> Self {
        Self { cleanup }
    }
}

#[async_trait]
impl EventHandler for UserStatusChangedHandler {
    fn name(&self) -> &str {
        "session_cleanup:user_status_changed"
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        let EventPayload::UserStatusChanged(payload) = &event.payload else {
            return Err(invalid_payload(Topic::UserStatusChanged));
        };
        let new_status = UserStatus::from_str(&payload.new_status).map_err(|e| {
            AppError::invalid_event_data(format!("invalid event data format: {}", e.message))
        })?;
        if !matches!(new_status, UserStatus::Inactive | UserStatus::Suspended) {
            debug!(user_id = %payload.user_id, status = %new_status, "Status change needs no cleanup");
            return Ok(());
        }
        let reason = payload
            .reason
            .clone()
            .unwrap_or_else(|| format!("user_{new_status}"));
        let request = CleanupRequest {
            user_id: payload.user_id,
            reason,
            actor: payload.changed_by,
            explanation: format!(
                "Status changed from {} to {}; all sessions invalidated",
                payload.old_status, payload.new_status
            ),
        };
        self.cleanup.run(event, request).await.map(|_| ())
    }
}

/// Cleans up sessions of a deleted user.
#[derive(Debug, Clone)]
pub struct UserDeletedHandler {
    cleanup: SessionCleanup,
}

impl UserDeletedHandler {
    /// Creates the handler.
    pub fn new(cleanup: SessionCleanup) -> Self {
        Self { cleanup }
    }
}

#[async_trait]
impl EventHandler for UserDeletedHandler {
    fn name(&self) -> &str {
        "session_cleanup:user_deleted"
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        let EventPayload::UserDeleted(payload) = &event.payload else {
            return Err(invalid_payload(Topic::UserDeleted));
        };
        let request = CleanupRequest {
            user_id: payload.user_id,
            reason: payload
                .reason
                .clone()
                .unwrap_or_else(|| "user_deleted".to_string()),
            actor: payload.deleted_by,
            explanation: "User account deleted; all sessions removed".to_string(),
        };
        self.cleanup.run(event, request).await.map(|_| ())
    }
}

/// Cleans up sessions of a deactivated user.
#[derive(Debug, Clone)]
pub struct UserDeactivatedHandler {
    cleanup: SessionCleanup,
}

impl UserDeactivatedHandler {
    /// Creates the handler.
    pub fn new(cleanup: SessionCleanup) -> Self {
        Self { cleanup }
    }
}

#[async_trait]
impl EventHandler for UserDeactivatedHandler {
    fn name(&self) -> &str {
        "session_cleanup:user_deactivated"
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        let EventPayload::UserDeactivated(payload) = &event.payload else {
            return Err(invalid_payload(Topic::UserDeactivated));
        };
        let request = CleanupRequest {
            user_id: payload.user_id,
            reason: payload
                .reason
                .clone()
                .unwrap_or_else(|| "user_deactivated".to_string()),
            actor: payload.deactivated_by,
            explanation: "User account deactivated; all sessions invalidated".to_string(),
        };
        self.cleanup.run(event, request).await.map(|_| ())
    }
}
