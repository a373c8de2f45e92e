//! In-memory user service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

use keystone_bus::EventBus;
use keystone_core::AppError;
use keystone_core::events::{
    AGGREGATE_USER, DomainEvent, EventMetadata, EventPayload, UserActivated, UserCreated,
    UserDeactivated, UserDeleted, UserStatusChanged,
};
use keystone_core::result::AppResult;
use keystone_core::traits::{PasswordHasher, TxContext};
use keystone_core::types::id::UserId;
use keystone_entity::user::{UserSnapshot, UserStatus};

use super::{NewUser, StatusChange, UserService};

const SOURCE: &str = "user";

type UserMap = Arc<RwLock<HashMap<UserId, UserSnapshot>>>;

/// User accounts kept in a `HashMap` under a read/write lock.
///
/// Writes apply immediately and are undone if the caller's transaction
/// rolls back. When a bus is attached, lifecycle changes are published
/// inside the same transaction: `user.created`, `user.status_changed`
/// (plus `user.activated` on reactivation), `user.deactivated` and
/// `user.deleted`.
#[derive(Clone)]
pub struct MemoryUserService {
    users: UserMap,
    hasher: Arc<dyn PasswordHasher>,
    bus: Option<EventBus>,
}

impl std::fmt::Debug for MemoryUserService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryUserService")
            .field("publishes", &self.bus.is_some())
            .finish()
    }
}

impl MemoryUserService {
    /// Creates an empty service that hashes passwords with `hasher`.
    pub fn new(hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            hasher,
            bus: None,
        }
    }

    /// Publish lifecycle events on `bus`.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Number of stored accounts.
    pub async fn count(&self) -> usize {
        self.users.read().await.len()
    }

    /// Deactivate an account and publish `user.deactivated`.
    pub async fn deactivate_user(
        &self,
        tx: &TxContext,
        id: UserId,
        deactivated_by: Option<UserId>,
        reason: Option<String>,
    ) -> AppResult<UserSnapshot> {
        let user = self
            .modify(tx, id, |user| user.status = UserStatus::Inactive)
            .await?;
        self.publish(
            &user,
            UserDeactivated {
                user_id: id,
                deactivated_by,
                reason,
            },
            deactivated_by,
        )
        .await?;
        info!(user_id = %id, "User deactivated");
        Ok(user)
    }

    /// Delete an account and publish `user.deleted`.
    pub async fn delete_user(
        &self,
        tx: &TxContext,
        id: UserId,
        deleted_by: Option<UserId>,
        reason: Option<String>,
    ) -> AppResult<()> {
        let removed = self
            .users
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| AppError::not_found("User not found"))?;
        self.record_restore(tx, id, Some(removed.clone())).await;
        self.publish(
            &removed,
            UserDeleted {
                user_id: id,
                email: Some(removed.email.clone()),
                deleted_by,
                reason,
            },
            deleted_by,
        )
        .await?;
        info!(user_id = %id, "User deleted");
        Ok(())
    }

    /// Apply `change` to a stored account, bumping its version.
    async fn modify(
        &self,
        tx: &TxContext,
        id: UserId,
        change: impl FnOnce(&mut UserSnapshot),
    ) -> AppResult<UserSnapshot> {
        let (previous, updated) = {
            let mut users = self.users.write().await;
            let user = users
                .get_mut(&id)
                .ok_or_else(|| AppError::not_found("User not found"))?;
            let previous = user.clone();
            change(user);
            user.version += 1;
            user.updated_at = Utc::now();
            (previous, user.clone())
        };
        self.record_restore(tx, id, Some(previous)).await;
        Ok(updated)
    }

    async fn record_restore(&self, tx: &TxContext, id: UserId, previous: Option<UserSnapshot>) {
        let users = Arc::clone(&self.users);
        tx.record_compensation(Box::new(move || {
            Box::pin(async move {
                let mut map = users.write().await;
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

    async fn publish(
        &self,
        user: &UserSnapshot,
        payload: impl Into<EventPayload>,
        actor: Option<UserId>,
    ) -> AppResult<()> {
        let Some(bus) = &self.bus else {
            return Ok(());
        };
        let mut metadata = EventMetadata::from_source(SOURCE);
        if let Some(actor) = actor {
            metadata = metadata.with_user_id(actor);
        }
        let event = DomainEvent::new(user.id.to_string(), AGGREGATE_USER, payload, metadata);
        bus.publish(&event)
            .await
            .map_err(|e| e.into_internal(format!("Failed to publish {}", event.event_type())))
    }
}

#[async_trait]
impl UserService for MemoryUserService {
    async fn create_user(&self, tx: &TxContext, user: NewUser) -> AppResult<UserSnapshot> {
        let email = user.email.trim().to_lowercase();
        let password_hash = self.hasher.hash(&user.password)?;
        let now = Utc::now();
        let snapshot = UserSnapshot {
            id: UserId::new(),
            email,
            name: user.name,
            status: UserStatus::Active,
            version: 1,
            password_hash,
            created_at: now,
            updated_at: now,
        };
        {
            let mut users = self.users.write().await;
            if users.values().any(|u| u.email == snapshot.email) {
                return Err(AppError::already_exists(
                    "A user with this email already exists",
                ));
            }
            users.insert(snapshot.id, snapshot.clone());
        }
        self.record_restore(tx, snapshot.id, None).await;
        self.publish(
            &snapshot,
            UserCreated {
                user_id: snapshot.id,
                email: snapshot.email.clone(),
                name: snapshot.name.clone(),
                status: snapshot.status.to_string(),
            },
            None,
        )
        .await?;
        info!(user_id = %snapshot.id, "User created");
        Ok(snapshot)
    }

    async fn get_user(&self, id: UserId) -> AppResult<UserSnapshot> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<UserSnapshot> {
        let email = email.trim().to_lowercase();
        self.users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    async fn change_user_password(
        &self,
        tx: &TxContext,
        id: UserId,
        new_password: &str,
    ) -> AppResult<UserSnapshot> {
        let password_hash = self.hasher.hash(new_password)?;
        self.modify(tx, id, move |user| user.password_hash = password_hash)
            .await
    }

    async fn change_user_status(
        &self,
        tx: &TxContext,
        change: StatusChange,
    ) -> AppResult<UserSnapshot> {
        let old_status = self.get_user(change.user_id).await?.status;
        let new_status = change.status;
        let user = self
            .modify(tx, change.user_id, |user| user.status = new_status)
            .await?;
        self.publish(
            &user,
            UserStatusChanged {
                user_id: user.id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
                changed_by: change.changed_by,
                reason: change.reason,
            },
            change.changed_by,
        )
        .await?;
        if new_status == UserStatus::Active && old_status != UserStatus::Active {
            self.publish(
                &user,
                UserActivated {
                    user_id: user.id,
                    activated_by: change.changed_by,
                },
                change.changed_by,
            )
            .await?;
        }
        info!(
            user_id = %user.id,
            old_status = %old_status,
            new_status = %new_status,
            "User status changed"
        );
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use keystone_core::ErrorCode;

    use super::*;

    struct PlainHasher;

    impl PasswordHasher for PlainHasher {
        fn hash(&self, password: &str) -> AppResult<String> {
            Ok(format!("plain:{password}"))
        }

        fn verify(&self, password: &str, hash: &str) -> AppResult<bool> {
            Ok(hash == format!("plain:{password}"))
        }
    }

    fn service() -> MemoryUserService {
        MemoryUserService::new(Arc::new(PlainHasher))
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password: "secret".to_string(),
            name: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup_by_email() {
        let users = service();
        let created = users
            .create_user(&TxContext::new(), new_user("A@X.com"))
            .await
            .unwrap();
        assert_eq!(created.email, "a@x.com");
        let found = users.get_user_by_email(" a@x.COM ").await.unwrap();
        assert_eq!(found.id, created.id);
        assert!(found.check_password(&PlainHasher, "secret").unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_email_already_exists() {
        let users = service();
        users
            .create_user(&TxContext::new(), new_user("a@x.com"))
            .await
            .unwrap();
        let err = users
            .create_user(&TxContext::new(), new_user("a@x.com"))
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::AlreadyExists));
    }

    #[tokio::test]
    async fn test_rollback_removes_created_user() {
        let users = service();
        let tx = TxContext::new();
        users.create_user(&tx, new_user("a@x.com")).await.unwrap();
        tx.run_compensations().await;
        assert_eq!(users.count().await, 0);
    }

    #[tokio::test]
    async fn test_status_change_bumps_version() {
        let users = service();
        let created = users
            .create_user(&TxContext::new(), new_user("a@x.com"))
            .await
            .unwrap();
        let updated = users
            .change_user_status(
                &TxContext::new(),
                StatusChange {
                    user_id: created.id,
                    status: UserStatus::Suspended,
                    changed_by: None,
                    reason: None,
                },
            )
            .await
            .unwrap();
        assert!(updated.is_suspended());
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let err = service().get_user(UserId::new()).await.unwrap_err();
        assert!(err.is(ErrorCode::NotFound));
    }
}
