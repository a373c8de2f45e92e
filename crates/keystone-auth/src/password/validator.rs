//! Password policy enforcement for new passwords.

use keystone_core::config::AuthConfig;
use keystone_core::traits::{PasswordCheck, PasswordValidator};

use super::common::COMMON_PASSWORDS;

/// Validates password strength against the configured policy.
///
/// Checks run in order and the first violation is reported: minimum
/// length, common-password list, character classes, then the zxcvbn
/// entropy score.
#[derive(Debug, Clone)]
pub struct PolicyPasswordValidator {
    min_length: usize,
    min_score: u8,
}

impl PolicyPasswordValidator {
    /// Creates a new validator from auth configuration.
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            min_length: config.password_min_length,
            min_score: config.password_min_score,
        }
    }
}

impl PasswordValidator for PolicyPasswordValidator {
    fn validate(&self, password: &str, user_inputs: &[&str]) -> PasswordCheck {
        if password.chars().count() < self.min_length {
            return PasswordCheck::fail(format!(
                "Password must be at least {} characters long",
                self.min_length
            ));
        }

        if self.is_common(password) {
            return PasswordCheck::fail("Password is too common");
        }

        if !password.chars().any(|c| c.is_uppercase()) {
            return PasswordCheck::fail("Password must contain at least one uppercase letter");
        }

        if !password.chars().any(|c| c.is_lowercase()) {
            return PasswordCheck::fail("Password must contain at least one lowercase letter");
        }

        if !password.chars().any(|c| c.is_ascii_digit()) {
            return PasswordCheck::fail("Password must contain at least one digit");
        }

        if !password.chars().any(|c| !c.is_alphanumeric()) {
            return PasswordCheck::fail("Password must contain at least one special character");
        }

        let estimate = zxcvbn::zxcvbn(password, user_inputs);
        if estimate.score() < required_score(self.min_score) {
            return PasswordCheck::fail(
                "Password is too weak. Please use a stronger password with more entropy.",
            );
        }

        PasswordCheck::pass()
    }

    fn is_common(&self, password: &str) -> bool {
        let candidate = password.trim();
        COMMON_PASSWORDS
            .iter()
            .any(|common| common.eq_ignore_ascii_case(candidate))
    }
}

fn required_score(min_score: u8) -> zxcvbn::Score {
    match min_score {
        0 => zxcvbn::Score::Zero,
        1 => zxcvbn::Score::One,
        2 => zxcvbn::Score::Two,
        3 => zxcvbn::Score::Three,
        _ => zxcvbn::Score::Four,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> PolicyPasswordValidator {
        PolicyPasswordValidator::new(&AuthConfig::default())
    }

    #[test]
    fn test_strong_password_passes() {
        let check = validator().validate("Vivid-Lantern-93-Orbit", &[]);
        assert!(check.passed, "{:?}", check.reason);
    }

    #[test]
    fn test_short_password_fails() {
        let check = validator().validate("Ab1!", &[]);
        assert!(!check.passed);
        assert!(check.reason.unwrap().contains("at least 8"));
    }

    #[test]
    fn test_common_password_is_detected() {
        let v = validator();
        assert!(v.is_common("password"));
        assert!(v.is_common("PASSWORD"));
        assert!(v.is_common("Password123!"));
        assert!(!v.is_common("Vivid-Lantern-93-Orbit"));

        let check = v.validate("Password123!", &[]);
        assert_eq!(check.reason.as_deref(), Some("Password is too common"));
    }

    #[test]
    fn test_missing_character_class_fails() {
        let check = validator().validate("vivid-lantern-93-orbit", &[]);
        assert!(check.reason.unwrap().contains("uppercase"));
    }
}
