//! # keystone-core
//!
//! Core crate for Keystone. Contains configuration schemas, typed
//! identifiers, the domain event contract shared by every module, the
//! traits describing external collaborators, and the unified error system.
//!
//! This crate has **no** internal dependencies on other Keystone crates.

pub mod config;
pub mod error;
pub mod events;
pub mod result;
pub mod traits;
pub mod types;

pub use error::{AppError, ErrorCode, ErrorKind};
pub use result::AppResult;
