//! User snapshot returned by the user collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keystone_core::AppResult;
use keystone_core::traits::PasswordHasher;
use keystone_core::types::id::UserId;

use super::status::UserStatus;

/// Point-in-time view of a user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    /// Unique user identifier.
    pub id: UserId,
    /// Login email address.
    pub email: String,
    /// Display name.
    pub name: Option<String>,
    /// Account status.
    pub status: UserStatus,
    /// Optimistic version counter.
    pub version: i64,
    /// Argon2 password hash (never serialized).
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl UserSnapshot {
    /// Whether the account may authenticate.
    pub fn is_active(&self) -> bool {
        self.status.can_login()
    }

    /// Whether the account is suspended.
    pub fn is_suspended(&self) -> bool {
        self.status == UserStatus::Suspended
    }

    /// Check a plaintext password against the stored hash.
    pub fn check_password(&self, hasher: &dyn PasswordHasher, password: &str) -> AppResult<bool> {
        if self.password_hash.is_empty() {
            return Ok(false);
        }
        hasher.verify(password, &self.password_hash)
    }
}
