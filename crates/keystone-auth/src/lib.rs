//! # keystone-auth
//!
//! Authentication and session lifecycle for Keystone.
//!
//! ## Modules
//!
//! - `service`: [`AuthService`] with login, registration, logout, session
//!   validation and refresh, password change, expired-session cleanup
//! - `command`: command and query objects plus their results
//! - `validation`: field-tagged command validation
//! - `password`: Argon2id hashing and password policy enforcement
//! - `rate_limit`: in-memory fixed-window rate limiter
//! - `user`: the [`UserService`] collaborator and an in-memory implementation

pub mod command;
pub mod password;
pub mod rate_limit;
pub mod service;
pub mod user;
pub mod validation;

pub use command::{
    ChangePasswordCommand, LoginCommand, LoginResult, LogoutCommand, RefreshSessionCommand,
    RegisterCommand, SessionValidation, ValidateSessionQuery,
};
pub use password::{Argon2PasswordHasher, PolicyPasswordValidator};
pub use rate_limit::MemoryRateLimiter;
pub use service::AuthService;
pub use user::{MemoryUserService, NewUser, StatusChange, UserService};
pub use validation::CommandValidator;
