//! PostgreSQL backends built on `sqlx`.

pub mod audit;
pub mod session;
pub mod transaction;

pub use audit::PgAuditStore;
pub use session::PgSessionRepository;
pub use transaction::{PgTransaction, PgTransactionManager};

use keystone_core::AppError;

/// Map a sqlx error into an internal [`AppError`] with context.
pub(crate) fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| AppError::with_source(keystone_core::ErrorCode::Internal, context, e)
}
