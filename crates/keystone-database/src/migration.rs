//! Database migration runner.

use sqlx::PgPool;
use tracing::info;

use keystone_core::error::{AppError, ErrorCode};

/// Run all pending migrations (`sessions`, `audit_events`).
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    info!("Running database migrations");

    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        AppError::with_source(
            ErrorCode::Internal,
            format!("Failed to run migrations: {e}"),
            e,
        )
    })?;

    info!("Database migrations completed");
    Ok(())
}
