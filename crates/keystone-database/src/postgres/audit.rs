//! PostgreSQL audit store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;
use sqlx::types::Json;

use keystone_core::events::EventMetadata;
use keystone_core::result::AppResult;
use keystone_core::types::id::{AuditEventId, EventId, UserId};
use keystone_entity::audit::{AuditEvent, AuditFilter};

use super::db_error;
use crate::store::AuditStore;

/// Row shape of the `audit_events` table.
#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: AuditEventId,
    event_id: Option<EventId>,
    event_type: String,
    user_id: Option<UserId>,
    action: String,
    resource: String,
    resource_id: Option<String>,
    details: Json<Map<String, Value>>,
    occurred_at: DateTime<Utc>,
    metadata: Json<EventMetadata>,
}

impl From<AuditRow> for AuditEvent {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            event_id: row.event_id,
            event_type: row.event_type,
            user_id: row.user_id,
            action: row.action,
            resource: row.resource,
            resource_id: row.resource_id,
            details: row.details.0,
            occurred_at: row.occurred_at,
            metadata: row.metadata.0,
        }
    }
}

/// Audit store over the `audit_events` table.
#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    /// Create a new audit store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn log_event(&self, event: &AuditEvent) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO audit_events \
             (id, event_id, event_type, user_id, action, resource, resource_id, details, occurred_at, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(event.id)
        .bind(event.event_id)
        .bind(&event.event_type)
        .bind(event.user_id)
        .bind(&event.action)
        .bind(&event.resource)
        .bind(&event.resource_id)
        .bind(Json(&event.details))
        .bind(event.occurred_at)
        .bind(Json(&event.metadata))
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to insert audit event"))?;
        Ok(())
    }

    async fn get_events(&self, filter: &AuditFilter) -> AppResult<Vec<AuditEvent>> {
        let mut conditions = Vec::new();
        let mut param_idx = 1u32;

        let mut push = |column: &str, op: &str| {
            conditions.push(format!("{column} {op} ${param_idx}"));
            param_idx += 1;
        };
        if filter.event_id.is_some() {
            push("event_id", "=");
        }
        if filter.user_id.is_some() {
            push("user_id", "=");
        }
        if filter.action.is_some() {
            push("action", "=");
        }
        if filter.resource.is_some() {
            push("resource", "=");
        }
        if filter.resource_id.is_some() {
            push("resource_id", "=");
        }
        if filter.event_type.is_some() {
            push("event_type", "=");
        }
        if filter.from.is_some() {
            push("occurred_at", ">=");
        }
        if filter.to.is_some() {
            push("occurred_at", "<=");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let select_sql = format!(
            "SELECT * FROM audit_events {where_clause} ORDER BY occurred_at DESC LIMIT ${param_idx} OFFSET ${}",
            param_idx + 1
        );

        let mut query = sqlx::query_as::<_, AuditRow>(&select_sql);
        if let Some(id) = filter.event_id {
            query = query.bind(id);
        }
        if let Some(id) = filter.user_id {
            query = query.bind(id);
        }
        if let Some(action) = &filter.action {
            query = query.bind(action.clone());
        }
        if let Some(resource) = &filter.resource {
            query = query.bind(resource.clone());
        }
        if let Some(resource_id) = &filter.resource_id {
            query = query.bind(resource_id.clone());
        }
        if let Some(event_type) = &filter.event_type {
            query = query.bind(event_type.clone());
        }
        if let Some(from) = filter.from {
            query = query.bind(from);
        }
        if let Some(to) = filter.to {
            query = query.bind(to);
        }

        let rows = query
            .bind(filter.effective_limit() as i64)
            .bind(filter.effective_offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to query audit events"))?;

        Ok(rows.into_iter().map(AuditEvent::from).collect())
    }
}
