//! Command validation.
//!
//! Required-field and shape checks come from the `validator` derives on
//! the command types; domain checks (password strength, common passwords,
//! new-differs-from-old) run afterwards. Every failure is a single
//! validation error tagged with the offending field.

use std::sync::Arc;

use validator::Validate;

use keystone_core::AppError;
use keystone_core::result::AppResult;
use keystone_core::traits::PasswordValidator;
use keystone_core::types::id::{SessionId, UserId};

use crate::command::{
    ChangePasswordCommand, LoginCommand, LogoutCommand, RefreshSessionCommand, RegisterCommand,
    ValidateSessionQuery,
};

/// Validates auth commands before any side effect happens.
#[derive(Clone)]
pub struct CommandValidator {
    passwords: Arc<dyn PasswordValidator>,
}

impl std::fmt::Debug for CommandValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandValidator").finish_non_exhaustive()
    }
}

impl CommandValidator {
    /// Creates a validator backed by a password policy.
    pub fn new(passwords: Arc<dyn PasswordValidator>) -> Self {
        Self { passwords }
    }

    /// Login needs an email and a password.
    pub fn login(&self, command: &LoginCommand) -> AppResult<()> {
        check_fields(command, &["email", "password"])
    }

    /// Registration also enforces the password policy.
    pub fn register(&self, command: &RegisterCommand) -> AppResult<()> {
        check_fields(command, &["email", "password", "name"])?;
        let mut inputs = vec![command.email.as_str()];
        if let Some(name) = command.name.as_deref() {
            inputs.push(name);
        }
        self.check_new_password("password", &command.password, &inputs)
    }

    /// Logout needs a session ID.
    pub fn logout(&self, command: &LogoutCommand) -> AppResult<()> {
        check_session_id(command.session_id)
    }

    /// Validation needs a session ID.
    pub fn validate_session(&self, query: &ValidateSessionQuery) -> AppResult<()> {
        check_session_id(query.session_id)
    }

    /// Refresh needs a session ID.
    pub fn refresh_session(&self, command: &RefreshSessionCommand) -> AppResult<()> {
        check_session_id(command.session_id)
    }

    /// The new password must differ from the old one and pass the policy.
    pub fn change_password(&self, command: &ChangePasswordCommand) -> AppResult<()> {
        check_user_id(command.user_id)?;
        check_fields(command, &["old_password", "new_password"])?;
        if command.old_password == command.new_password {
            return Err(AppError::validation(
                "new_password",
                "New password must be different from the current password",
            ));
        }
        self.check_new_password("new_password", &command.new_password, &[])
    }

    fn check_new_password(&self, field: &str, password: &str, inputs: &[&str]) -> AppResult<()> {
        let check = self.passwords.validate(password, inputs);
        if !check.passed {
            let reason = check
                .reason
                .unwrap_or_else(|| "Password does not meet the password policy".to_string());
            return Err(AppError::validation(field, reason));
        }
        if self.passwords.is_common(password) {
            return Err(AppError::validation(field, "Password is too common"));
        }
        Ok(())
    }
}

/// Run the derived checks and report the first failing field in `order`.
fn check_fields<T: Validate>(command: &T, order: &[&str]) -> AppResult<()> {
    let Err(errors) = command.validate() else {
        return Ok(());
    };
    let field_errors = errors.field_errors();
    for field in order {
        if let Some(first) = field_errors.get(*field).and_then(|errs| errs.first()) {
            let message = first
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("{field} is invalid"));
            return Err(AppError::validation(*field, message));
        }
    }
    Err(AppError::validation("command", errors.to_string()))
}

fn check_session_id(id: SessionId) -> AppResult<()> {
    if id.is_nil() {
        return Err(AppError::validation("session_id", "Session ID is required"));
    }
    Ok(())
}

fn check_user_id(id: UserId) -> AppResult<()> {
    if id.is_nil() {
        return Err(AppError::validation("user_id", "User ID is required"));
    }
    Ok(())
}
