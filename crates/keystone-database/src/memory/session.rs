//! In-memory session repository.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use keystone_core::AppError;
use keystone_core::result::AppResult;
use keystone_core::traits::TxContext;
use keystone_core::types::id::{SessionId, UserId};
use keystone_entity::session::Session;

use crate::store::SessionRepository;

type SessionMap = Arc<RwLock<HashMap<SessionId, Session>>>;

/// Session store backed by a `HashMap` under a read/write lock.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionRepository {
    sessions: SessionMap,
    fail_writes: Arc<AtomicBool>,
}

impl MemorySessionRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every transactional write fail, simulating a database outage.
    pub fn set_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Insert or overwrite a session outside any transaction.
    pub async fn insert(&self, session: Session) {
        self.sessions.write().await.insert(session.id, session);
    }

    fn check_writable(&self) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::internal("Session store write failed"));
        }
        Ok(())
    }

    /// Record an undo that puts `previous` back (or removes `id` if `None`).
    async fn record_restore(&self, tx: &TxContext, id: SessionId, previous: Option<Session>) {
        let sessions = Arc::clone(&self.sessions);
        tx.record_compensation(Box::new(move || {
            Box::pin(async move {
                let mut map = sessions.write().await;
                match previous {
                    Some(prev) => {
                        map.insert(id, prev);
                    }
                    None => {
                        map.remove(&id);
                    }
                }
            })
        }))
        .await;
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn create(&self, tx: &TxContext, session: &Session) -> AppResult<()> {
        self.check_writable()?;
        {
            let mut map = self.sessions.write().await;
            if map.contains_key(&session.id) {
                return Err(AppError::already_exists("Session already exists"));
            }
            map.insert(session.id, session.clone());
        }
        self.record_restore(tx, session.id, None).await;
        Ok(())
    }

    async fn update(&self, tx: &TxContext, session: &Session) -> AppResult<()> {
        self.check_writable()?;
        let previous = {
            let mut map = self.sessions.write().await;
            let Some(stored) = map.get(&session.id) else {
                return Err(AppError::not_found("Session not found"));
            };
            if stored.version + 1 != session.version {
                return Err(AppError::internal("Session was modified concurrently"));
            }
            map.insert(session.id, session.clone())
        };
        self.record_restore(tx, session.id, previous).await;
        Ok(())
    }

    async fn find_by_id(&self, id: SessionId) -> AppResult<Option<Session>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn find_by_user(&self, user_id: UserId) -> AppResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete(&self, tx: &TxContext, id: SessionId) -> AppResult<bool> {
        self.check_writable()?;
        let removed = self.sessions.write().await.remove(&id);
        let existed = removed.is_some();
        if existed {
            self.record_restore(tx, id, removed).await;
        }
        Ok(existed)
    }

    async fn delete_by_user(&self, tx: &TxContext, user_id: UserId) -> AppResult<u64> {
        self.check_writable()?;
        let removed: Vec<Session> = {
            let mut map = self.sessions.write().await;
            let ids: Vec<SessionId> = map
                .values()
                .filter(|s| s.user_id == user_id)
                .map(|s| s.id)
                .collect();
            ids.iter().filter_map(|id| map.remove(id)).collect()
        };
        let count = removed.len() as u64;
        for session in removed {
            self.record_restore(tx, session.id, Some(session)).await;
        }
        Ok(count)
    }

    async fn delete_expired(&self) -> AppResult<u64> {
        let now = Utc::now();
        let mut map = self.sessions.write().await;
        let before = map.len();
        map.retain(|_, s| s.expires_at > now);
        Ok((before - map.len()) as u64)
    }

    async fn count(&self) -> AppResult<u64> {
        Ok(self.sessions.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use keystone_core::config::SessionConfig;
    use keystone_core::traits::TransactionManager;

    use super::*;
    use crate::memory::MemoryTransactionManager;

    fn session(user_id: UserId) -> Session {
        Session::create(user_id, "10.0.0.1", "ua", &SessionConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_rollback_restores_previous_state() {
        let repo = MemorySessionRepository::new();
        let tm = MemoryTransactionManager::new();
        let user = UserId::new();
        let kept = session(user);
        repo.insert(kept.clone()).await;

        let tx = tm.begin().await.unwrap();
        let fresh = session(user);
        repo.create(&tx, &fresh).await.unwrap();
        assert_eq!(repo.delete_by_user(&tx, user).await.unwrap(), 2);
        assert_eq!(repo.count().await.unwrap(), 0);
        tm.rollback(tx).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.find_by_id(kept.id).await.unwrap(), Some(kept));
        assert!(repo.find_by_id(fresh.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_requires_next_version() {
        let repo = MemorySessionRepository::new();
        let tx = TxContext::new();
        let mut s = session(UserId::new());
        repo.create(&tx, &s).await.unwrap();

        s.extend(Duration::minutes(5));
        repo.update(&tx, &s).await.unwrap();
        // Stale copy: same version as stored.
        assert!(repo.update(&tx, &s).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let repo = MemorySessionRepository::new();
        let mut old = session(UserId::new());
        old.expires_at = Utc::now() - Duration::seconds(1);
        repo.insert(old).await;
        repo.insert(session(UserId::new())).await;

        assert_eq!(repo.delete_expired().await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_write_failure() {
        let repo = MemorySessionRepository::new();
        repo.set_write_failure(true);
        let err = repo
            .create(&TxContext::new(), &session(UserId::new()))
            .await
            .unwrap_err();
        assert_eq!(err.message, "Session store write failed");
    }
}
