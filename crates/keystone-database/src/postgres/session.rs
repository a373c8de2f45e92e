//! PostgreSQL session repository.

use async_trait::async_trait;
use sqlx::PgPool;

use keystone_core::AppError;
use keystone_core::result::AppResult;
use keystone_core::traits::TxContext;
use keystone_core::types::id::{SessionId, UserId};
use keystone_entity::session::Session;

use super::db_error;
use super::transaction::with_tx_conn;
use crate::store::SessionRepository;

/// Session repository over the `sessions` table.
#[derive(Debug, Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    /// Create a new session repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn create(&self, tx: &TxContext, session: &Session) -> AppResult<()> {
        with_tx_conn!(tx, |conn| {
            sqlx::query(
                "INSERT INTO sessions \
                 (id, user_id, created_at, expires_at, max_expires_at, ip_address, user_agent, active, version) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(session.id)
            .bind(session.user_id)
            .bind(session.created_at)
            .bind(session.expires_at)
            .bind(session.max_expires_at)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(session.active)
            .bind(session.version)
            .execute(conn)
            .await
            .map_err(db_error("Failed to create session"))?;
        });
        Ok(())
    }

    async fn update(&self, tx: &TxContext, session: &Session) -> AppResult<()> {
        let result = with_tx_conn!(tx, |conn| {
            sqlx::query(
                "UPDATE sessions SET expires_at = $2, ip_address = $3, user_agent = $4, \
                 active = $5, version = $6 WHERE id = $1 AND version = $7",
            )
            .bind(session.id)
            .bind(session.expires_at)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(session.active)
            .bind(session.version)
            .bind(session.version - 1)
            .execute(conn)
            .await
            .map_err(db_error("Failed to update session"))?
        });
        if result.rows_affected() == 0 {
            return Err(AppError::internal(
                "Session was modified concurrently or no longer exists",
            ));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: SessionId) -> AppResult<Option<Session>> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find session"))
    }

    async fn find_by_user(&self, user_id: UserId) -> AppResult<Vec<Session>> {
        sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to find user sessions"))
    }

    async fn delete(&self, tx: &TxContext, id: SessionId) -> AppResult<bool> {
        let result = with_tx_conn!(tx, |conn| {
            sqlx::query("DELETE FROM sessions WHERE id = $1")
                .bind(id)
                .execute(conn)
                .await
                .map_err(db_error("Failed to delete session"))?
        });
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_user(&self, tx: &TxContext, user_id: UserId) -> AppResult<u64> {
        let result = with_tx_conn!(tx, |conn| {
            sqlx::query("DELETE FROM sessions WHERE user_id = $1")
                .bind(user_id)
                .execute(conn)
                .await
                .map_err(db_error("Failed to delete user sessions"))?
        });
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to delete expired sessions"))?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> AppResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to count sessions"))?;
        Ok(count as u64)
    }
}
