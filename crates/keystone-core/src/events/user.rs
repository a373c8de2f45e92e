//! User-lifecycle event payloads.

use serde::{Deserialize, Serialize};

use crate::types::id::UserId;

/// A new user was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCreated {
    /// The user ID.
    pub user_id: UserId,
    /// The account email.
    pub email: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Initial status.
    pub status: String,
}

/// A user profile was updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserUpdated {
    /// The user ID.
    pub user_id: UserId,
    /// Fields that changed.
    #[serde(default)]
    pub changed_fields: Vec<String>,
}

/// A user was deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDeleted {
    /// The user ID.
    pub user_id: UserId,
    /// The account email at the time of deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Who deleted the account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<UserId>,
    /// Why the account was deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A user's status was changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStatusChanged {
    /// The user ID.
    pub user_id: UserId,
    /// The previous status.
    pub old_status: String,
    /// The new status.
    pub new_status: String,
    /// Who changed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<UserId>,
    /// Why it changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A user's email address was changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEmailChanged {
    /// The user ID.
    pub user_id: UserId,
    /// The previous email.
    pub old_email: String,
    /// The new email.
    pub new_email: String,
}

/// A user account was activated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActivated {
    /// The user ID.
    pub user_id: UserId,
    /// Who activated it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_by: Option<UserId>,
}

/// A user account was deactivated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDeactivated {
    /// The user ID.
    pub user_id: UserId,
    /// Who deactivated it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivated_by: Option<UserId>,
    /// Why it was deactivated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
