//! Backend selection.

use std::sync::Arc;

use tracing::info;

use keystone_core::config::{DatabaseBackend, DatabaseConfig};
use keystone_core::result::AppResult;
use keystone_core::traits::TransactionManager;

use crate::connection::DatabasePool;
use crate::memory::{MemoryAuditStore, MemorySessionRepository, MemoryTransactionManager};
use crate::postgres::{PgAuditStore, PgSessionRepository, PgTransactionManager};
use crate::store::{AuditStore, SessionRepository};

/// The transaction manager and stores of one backend, wired together.
#[derive(Clone)]
pub struct StorageBackends {
    /// Transaction boundary for the auth use cases.
    pub transactions: Arc<dyn TransactionManager>,
    /// Session store.
    pub sessions: Arc<dyn SessionRepository>,
    /// Audit store.
    pub audit: Arc<dyn AuditStore>,
    /// Pool handle when running on PostgreSQL.
    pub pool: Option<DatabasePool>,
}

impl StorageBackends {
    /// Build the backend selected by `config.backend`.
    ///
    /// The PostgreSQL backend connects and runs pending migrations first.
    pub async fn from_config(config: &DatabaseConfig) -> AppResult<Self> {
        match config.backend {
            DatabaseBackend::Memory => {
                info!("Initializing in-memory storage backend");
                Ok(Self::memory())
            }
            DatabaseBackend::Postgres => {
                info!("Initializing PostgreSQL storage backend");
                let db = DatabasePool::open(config).await?;
                let pool = db.pool().clone();
                Ok(Self {
                    transactions: Arc::new(PgTransactionManager::new(pool.clone())),
                    sessions: Arc::new(PgSessionRepository::new(pool.clone())),
                    audit: Arc::new(PgAuditStore::new(pool)),
                    pool: Some(db),
                })
            }
        }
    }

    /// Fresh in-memory backend.
    pub fn memory() -> Self {
        Self {
            transactions: Arc::new(MemoryTransactionManager::new()),
            sessions: Arc::new(MemorySessionRepository::new()),
            audit: Arc::new(MemoryAuditStore::new()),
            pool: None,
        }
    }

    /// Fails if the PostgreSQL backend cannot be reached. Always passes in
    /// memory.
    pub async fn health(&self) -> AppResult<()> {
        match &self.pool {
            Some(pool) => pool.ping().await,
            None => Ok(()),
        }
    }

    /// Release backend resources.
    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_is_healthy_without_pool() {
        let backends = StorageBackends::from_config(&DatabaseConfig::default()).await.unwrap();
        assert!(backends.pool.is_none());
        backends.health().await.unwrap();
        backends.close().await;
    }
}
