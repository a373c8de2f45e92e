//! Command and query objects accepted by [`AuthService`](crate::AuthService).

use serde::{Deserialize, Serialize};
use validator::Validate;

use keystone_core::types::id::{SessionId, UserId};
use keystone_entity::session::Session;
use keystone_entity::user::UserSnapshot;

/// Authenticate with email and password.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoginCommand {
    /// Login email.
    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Email address is not valid")
    )]
    pub email: String,
    /// Plaintext password.
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    /// Client IP address.
    #[serde(default)]
    pub ip_address: String,
    /// Client user-agent.
    #[serde(default)]
    pub user_agent: String,
}

/// Create an account and its first session.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterCommand {
    /// Account email.
    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Email address is not valid")
    )]
    pub email: String,
    /// Plaintext password.
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    /// Display name.
    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    #[serde(default)]
    pub name: Option<String>,
    /// Client IP address, also the rate-limit key.
    #[serde(default)]
    pub ip_address: String,
    /// Client user-agent.
    #[serde(default)]
    pub user_agent: String,
}

/// End one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutCommand {
    /// The session to delete.
    pub session_id: SessionId,
}

/// Check whether a session may still be used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateSessionQuery {
    /// The session to check.
    pub session_id: SessionId,
    /// Caller IP, compared against the stored fingerprint when supplied.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Caller user-agent, compared against the stored fingerprint when supplied.
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Push a valid session's expiry forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSessionCommand {
    /// The session to extend.
    pub session_id: SessionId,
    /// Caller IP, compared against the stored fingerprint when supplied.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Caller user-agent, compared against the stored fingerprint when supplied.
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Replace a user's password and end all of their sessions.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChangePasswordCommand {
    /// The account owner.
    pub user_id: UserId,
    /// Current password.
    #[validate(length(min = 1, message = "Current password is required"))]
    pub old_password: String,
    /// New password.
    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,
}

/// Result of a successful login or registration.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    /// The authenticated user.
    pub user: UserSnapshot,
    /// The session created for this login.
    pub session: Session,
}

/// Outcome of [`AuthService::validate_session`](crate::AuthService::validate_session).
///
/// `session` and `user` are filled in as far as the check got before the
/// session was found unusable.
#[derive(Debug, Clone, Serialize)]
pub struct SessionValidation {
    /// The owning user, when looked up.
    pub user: Option<UserSnapshot>,
    /// The stored session, when it exists.
    pub session: Option<Session>,
    /// Whether the session may be used.
    pub valid: bool,
}

impl SessionValidation {
    pub(crate) fn invalid(session: Option<Session>, user: Option<UserSnapshot>) -> Self {
        Self {
            user,
            session,
            valid: false,
        }
    }
}

/// Fingerprint values to compare, falling back to the stored value for
/// anything not supplied. `None` when nothing was supplied.
pub(crate) fn supplied_fingerprint<'a>(
    session: &'a Session,
    ip_address: Option<&'a str>,
    user_agent: Option<&'a str>,
) -> Option<(&'a str, &'a str)> {
    if ip_address.is_none() && user_agent.is_none() {
        return None;
    }
    Some((
        ip_address.unwrap_or(&session.ip_address),
        user_agent.unwrap_or(&session.user_agent),
    ))
}
