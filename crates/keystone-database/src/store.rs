//! Store traits for sessions and audit records.

use async_trait::async_trait;

use keystone_core::result::AppResult;
use keystone_core::traits::TxContext;
use keystone_core::types::id::{SessionId, UserId};
use keystone_entity::audit::{AuditEvent, AuditFilter};
use keystone_entity::session::Session;

/// Session persistence.
///
/// Mutations take the ambient [`TxContext`] of the calling use case; a
/// rollback of that context undoes them. Reads see committed state.
#[async_trait]
pub trait SessionRepository: Send + Sync + 'static {
    /// Insert a new session.
    async fn create(&self, tx: &TxContext, session: &Session) -> AppResult<()>;

    /// Persist a mutated session. `session.version` must be exactly one
    /// ahead of the stored version.
    async fn update(&self, tx: &TxContext, session: &Session) -> AppResult<()>;

    /// Find a session by ID.
    async fn find_by_id(&self, id: SessionId) -> AppResult<Option<Session>>;

    /// All sessions owned by a user, newest first.
    async fn find_by_user(&self, user_id: UserId) -> AppResult<Vec<Session>>;

    /// Delete one session. Returns `true` if it existed.
    async fn delete(&self, tx: &TxContext, id: SessionId) -> AppResult<bool>;

    /// Delete every session owned by a user. Returns the number removed.
    async fn delete_by_user(&self, tx: &TxContext, user_id: UserId) -> AppResult<u64>;

    /// Delete every expired session. Returns the number removed.
    async fn delete_expired(&self) -> AppResult<u64>;

    /// Total number of stored sessions.
    async fn count(&self) -> AppResult<u64>;
}

/// Persisted audit trail.
#[async_trait]
pub trait AuditStore: Send + Sync + 'static {
    /// Append an audit record.
    async fn log_event(&self, event: &AuditEvent) -> AppResult<()>;

    /// Records matching `filter`, most recent first, honouring limit/offset.
    async fn get_events(&self, filter: &AuditFilter) -> AppResult<Vec<AuditEvent>>;
}
