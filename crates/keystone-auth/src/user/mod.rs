//! The user-account collaborator.
//!
//! Account persistence and profile rules live outside the auth core; the
//! auth service reaches them only through [`UserService`].

pub mod memory;

use async_trait::async_trait;

use keystone_core::result::AppResult;
use keystone_core::traits::TxContext;
use keystone_core::types::id::UserId;
use keystone_entity::user::{UserSnapshot, UserStatus};

pub use memory::MemoryUserService;

/// Data for a new account.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Login email.
    pub email: String,
    /// Plaintext password; hashed by the service.
    pub password: String,
    /// Display name.
    pub name: Option<String>,
}

/// A status transition and who requested it.
#[derive(Debug, Clone)]
pub struct StatusChange {
    /// The account.
    pub user_id: UserId,
    /// The target status.
    pub status: UserStatus,
    /// The acting user.
    pub changed_by: Option<UserId>,
    /// Why the status changed.
    pub reason: Option<String>,
}

/// User account operations consumed by the auth service.
///
/// Lookups report a missing account as `NOT_FOUND`; creating an account
/// whose email is taken reports `ALREADY_EXISTS`. Mutations join the
/// caller's transaction.
#[async_trait]
pub trait UserService: Send + Sync + 'static {
    /// Create an active account.
    async fn create_user(&self, tx: &TxContext, user: NewUser) -> AppResult<UserSnapshot>;

    /// Fetch an account by ID.
    async fn get_user(&self, id: UserId) -> AppResult<UserSnapshot>;

    /// Fetch an account by email (case-insensitive).
    async fn get_user_by_email(&self, email: &str) -> AppResult<UserSnapshot>;

    /// Replace the account's password.
    async fn change_user_password(
        &self,
        tx: &TxContext,
        id: UserId,
        new_password: &str,
    ) -> AppResult<UserSnapshot>;

    /// Move the account to another status.
    async fn change_user_status(
        &self,
        tx: &TxContext,
        change: StatusChange,
    ) -> AppResult<UserSnapshot>;
}
