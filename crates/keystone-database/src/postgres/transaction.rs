//! PostgreSQL transaction manager.
//!
//! `begin` opens a `sqlx` transaction and parks it in the context's backend
//! slot. Repositories borrow it from there for every statement, so all
//! writes of one use case share the same database transaction.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use keystone_core::AppError;
use keystone_core::result::AppResult;
use keystone_core::traits::{TransactionManager, TxContext};

use super::db_error;

/// The backend transaction stored in a [`TxContext`].
pub type PgTransaction = Transaction<'static, Postgres>;

/// Transaction manager over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgTransactionManager {
    pool: PgPool,
}

impl PgTransactionManager {
    /// Create a new transaction manager.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionManager for PgTransactionManager {
    async fn begin(&self) -> AppResult<TxContext> {
        let txn: PgTransaction = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;
        let tx = TxContext::with_backend(txn);
        debug!(tx_id = %tx.id(), "Transaction started");
        Ok(tx)
    }

    async fn commit(&self, tx: TxContext) -> AppResult<()> {
        let txn = tx
            .take_backend::<PgTransaction>()
            .await
            .ok_or_else(|| AppError::internal("Transaction context has no database transaction"))?;
        txn.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;
        tx.discard_compensations().await;
        debug!(tx_id = %tx.id(), "Transaction committed");
        Ok(())
    }

    async fn rollback(&self, tx: TxContext) -> AppResult<()> {
        if let Some(txn) = tx.take_backend::<PgTransaction>().await {
            txn.rollback()
                .await
                .map_err(db_error("Failed to roll back transaction"))?;
        }
        tx.run_compensations().await;
        debug!(tx_id = %tx.id(), "Transaction rolled back");
        Ok(())
    }
}

/// Run `$body` with `$conn` bound to the transaction's connection.
macro_rules! with_tx_conn {
    ($tx:expr, |$conn:ident| $body:expr) => {{
        let mut slot = $tx.backend().await;
        let txn = slot
            .as_mut()
            .and_then(|b| b.downcast_mut::<$crate::postgres::PgTransaction>())
            .ok_or_else(|| {
                keystone_core::AppError::internal("Transaction context has no database transaction")
            })?;
        let $conn: &mut sqlx::PgConnection = &mut *txn;
        $body
    }};
}

pub(crate) use with_tx_conn;
