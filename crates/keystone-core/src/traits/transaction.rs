//! Transaction boundary used by the auth service and cleanup handlers.
//!
//! A [`TxContext`] is handed to every store mutation made inside a use case.
//! Backends that have a real database transaction park it in the context's
//! backend slot; in-memory backends instead record an undo action per
//! mutation, which rollback replays newest first.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::result::AppResult;

/// Undo action recorded by an in-memory store.
pub type Compensation = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Type-erased backend transaction (e.g. a `sqlx::Transaction`).
pub type BackendSlot = Option<Box<dyn Any + Send>>;

struct TxInner {
    id: Uuid,
    journal: Mutex<Vec<Compensation>>,
    backend: Mutex<BackendSlot>,
}

/// Transaction-scoped context. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct TxContext {
    inner: Arc<TxInner>,
}

impl TxContext {
    /// Start an empty context.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TxInner {
                id: Uuid::new_v4(),
                journal: Mutex::new(Vec::new()),
                backend: Mutex::new(None),
            }),
        }
    }

    /// Start a context holding a backend transaction.
    pub fn with_backend<B: Any + Send>(backend: B) -> Self {
        let ctx = Self::new();
        if let Ok(mut slot) = ctx.inner.backend.try_lock() {
            *slot = Some(Box::new(backend));
        }
        ctx
    }

    /// Transaction identifier, for logs.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Record an undo action to run if the transaction rolls back.
    pub async fn record_compensation(&self, undo: Compensation) {
        self.inner.journal.lock().await.push(undo);
    }

    /// Number of recorded undo actions.
    pub async fn pending_compensations(&self) -> usize {
        self.inner.journal.lock().await.len()
    }

    /// Drop all undo actions (commit path).
    pub async fn discard_compensations(&self) {
        self.inner.journal.lock().await.clear();
    }

    /// Run all undo actions newest first (rollback path).
    pub async fn run_compensations(&self) {
        let undo: Vec<Compensation> = std::mem::take(&mut *self.inner.journal.lock().await);
        for action in undo.into_iter().rev() {
            action().await;
        }
    }

    /// Lock the backend slot.
    pub async fn backend(&self) -> MutexGuard<'_, BackendSlot> {
        self.inner.backend.lock().await
    }

    /// Take the backend transaction out of the slot.
    pub async fn take_backend<B: Any + Send>(&self) -> Option<B> {
        let boxed = self.inner.backend.lock().await.take()?;
        boxed.downcast::<B>().ok().map(|b| *b)
    }
}

impl Default for TxContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TxContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxContext").field("id", &self.inner.id).finish()
    }
}

/// Begins, commits and rolls back transactions.
#[async_trait]
pub trait TransactionManager: Send + Sync + 'static {
    /// Open a transaction.
    async fn begin(&self) -> AppResult<TxContext>;

    /// Make every mutation recorded in `tx` durable.
    async fn commit(&self, tx: TxContext) -> AppResult<()>;

    /// Undo every mutation recorded in `tx`.
    async fn rollback(&self, tx: TxContext) -> AppResult<()>;
}

/// Commit on `Ok`, roll back on `Err`, and pass the outcome through.
pub async fn complete<T>(
    manager: &dyn TransactionManager,
    tx: TxContext,
    outcome: AppResult<T>,
) -> AppResult<T> {
    match outcome {
        Ok(value) => {
            manager.commit(tx).await?;
            Ok(value)
        }
        Err(err) => {
            let tx_id = tx.id();
            if let Err(rollback_err) = manager.rollback(tx).await {
                tracing::error!(tx_id = %tx_id, error = %rollback_err, "Transaction rollback failed");
            }
            tracing::debug!(tx_id = %tx_id, error = %err, "Transaction rolled back");
            Err(err)
        }
    }
}

/// Run `f` inside a transaction; any error returned by `f` rolls back.
pub async fn execute_in_transaction<T, F, Fut>(manager: &dyn TransactionManager, f: F) -> AppResult<T>
where
    F: FnOnce(TxContext) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let tx = manager.begin().await?;
    let outcome = f(tx.clone()).await;
    complete(manager, tx, outcome).await
}
