//! Password hashing and policy enforcement.

mod common;
pub mod hasher;
pub mod validator;

pub use hasher::Argon2PasswordHasher;
pub use validator::PolicyPasswordValidator;
