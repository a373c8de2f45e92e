//! Argon2id password hashing and verification.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        PasswordHash, PasswordHasher as ArgonHasher, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};

use keystone_core::AppError;
use keystone_core::config::AuthConfig;
use keystone_core::result::AppResult;
use keystone_core::traits::PasswordHasher;

/// Argon2id hasher with cost parameters taken from [`AuthConfig`].
#[derive(Clone)]
pub struct Argon2PasswordHasher {
    argon2: Argon2<'static>,
}

impl std::fmt::Debug for Argon2PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Argon2PasswordHasher").finish_non_exhaustive()
    }
}

impl Argon2PasswordHasher {
    /// Build a hasher from the configured memory, iteration and
    /// parallelism costs.
    pub fn new(config: &AuthConfig) -> AppResult<Self> {
        let params = Params::new(
            config.argon2_memory_kib,
            config.argon2_iterations,
            config.argon2_parallelism,
            None,
        )
        .map_err(|e| AppError::configuration(format!("Invalid Argon2 parameters: {e}")))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, password: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::internal(format!("Password hashing failed: {e}")))?;
        Ok(hash.to_string())
    }

    /// Returns `Ok(false)` on mismatch; a malformed hash is an error.
    fn verify(&self, password: &str, hash: &str) -> AppResult<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::internal(format!("Invalid password hash format: {e}")))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AppError::internal(format!(
                "Password verification failed: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> AuthConfig {
        AuthConfig {
            argon2_memory_kib: 1024,
            argon2_iterations: 1,
            ..AuthConfig::default()
        }
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = Argon2PasswordHasher::new(&cheap()).unwrap();
        let hash = hasher.hash("Corr3ct-Horse!").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("Corr3ct-Horse!", &hash).unwrap());
        assert!(!hasher.verify("wrong", &hash).unwrap());
    }

    #[test]
    fn test_malformed_hash_is_error() {
        let hasher = Argon2PasswordHasher::new(&cheap()).unwrap();
        assert!(hasher.verify("x", "not-a-hash").is_err());
    }

    #[test]
    fn test_rejects_bad_params() {
        let config = AuthConfig {
            argon2_parallelism: 0,
            ..cheap()
        };
        assert!(Argon2PasswordHasher::new(&config).is_err());
    }
}
