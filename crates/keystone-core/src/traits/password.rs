//! Password hashing and strength validation capabilities.

use crate::result::AppResult;

/// Hashes and verifies secrets.
pub trait PasswordHasher: Send + Sync + 'static {
    /// Hash a plaintext password.
    fn hash(&self, password: &str) -> AppResult<String>;

    /// Verify a plaintext password against a stored hash.
    fn verify(&self, password: &str, hash: &str) -> AppResult<bool>;
}

/// Outcome of a password strength check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordCheck {
    /// Whether the password passed.
    pub passed: bool,
    /// Why it failed, when it did.
    pub reason: Option<String>,
}

impl PasswordCheck {
    /// A passing check.
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    /// A failing check with a reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Judges password complexity.
pub trait PasswordValidator: Send + Sync + 'static {
    /// Check strength. `user_inputs` (email, name) are penalized when they
    /// appear in the password.
    fn validate(&self, password: &str, user_inputs: &[&str]) -> PasswordCheck;

    /// Whether the password is on the common-password list.
    fn is_common(&self, password: &str) -> bool;
}
