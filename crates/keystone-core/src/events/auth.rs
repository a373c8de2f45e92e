//! Authentication and session event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::id::{SessionId, UserId};

/// A user logged in and a session was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLoggedIn {
    /// The user ID.
    pub user_id: UserId,
    /// The new session ID.
    pub session_id: SessionId,
    /// The login email.
    pub email: String,
    /// Client IP address.
    #[serde(default)]
    pub ip_address: String,
    /// Client user-agent.
    #[serde(default)]
    pub user_agent: String,
}

/// A user logged out and the session was deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLoggedOut {
    /// The user ID.
    pub user_id: UserId,
    /// The deleted session ID.
    pub session_id: SessionId,
}

/// A user registered and received a first session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRegistered {
    /// The user ID.
    pub user_id: UserId,
    /// The first session ID.
    pub session_id: SessionId,
    /// The registration email.
    pub email: String,
    /// Client IP address.
    #[serde(default)]
    pub ip_address: String,
}

/// A session was found expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExpired {
    /// The user ID.
    pub user_id: UserId,
    /// The expired session ID.
    pub session_id: SessionId,
    /// When the session expired.
    pub expired_at: DateTime<Utc>,
}

/// A user changed their password.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordChanged {
    /// The user ID.
    pub user_id: UserId,
}
