//! In-memory transaction manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use keystone_core::AppError;
use keystone_core::result::AppResult;
use keystone_core::traits::{TransactionManager, TxContext};

/// Transaction manager driving the compensation journal of [`TxContext`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTransactionManager {
    commits: Arc<AtomicU64>,
    rollbacks: Arc<AtomicU64>,
    fail_begin: Arc<AtomicBool>,
}

impl MemoryTransactionManager {
    /// Create a new manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed transactions.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of rolled-back transactions.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Make `begin` fail, simulating an unavailable database.
    pub fn set_begin_failure(&self, fail: bool) {
        self.fail_begin.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransactionManager for MemoryTransactionManager {
    async fn begin(&self) -> AppResult<TxContext> {
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(AppError::internal("Failed to begin transaction"));
        }
        let tx = TxContext::new();
        debug!(tx_id = %tx.id(), "Transaction started");
        Ok(tx)
    }

    async fn commit(&self, tx: TxContext) -> AppResult<()> {
        tx.discard_compensations().await;
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!(tx_id = %tx.id(), "Transaction committed");
        Ok(())
    }

    async fn rollback(&self, tx: TxContext) -> AppResult<()> {
        let undone = tx.pending_compensations().await;
        tx.run_compensations().await;
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        debug!(tx_id = %tx.id(), undone, "Transaction rolled back");
        Ok(())
    }
}
