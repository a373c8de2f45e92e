//! # keystone-database
//!
//! Persistence for Keystone sessions and audit records, plus the
//! transaction boundary the auth service runs its use cases in.
//!
//! Two backends are provided:
//!
//! - **postgres**: `sqlx` repositories that run inside a real database
//!   transaction parked in the [`TxContext`](keystone_core::traits::TxContext)
//! - **memory**: `RwLock`-protected maps that record undo actions in the
//!   transaction context so a rollback restores the previous state
//!
//! The backend is selected at runtime by [`StorageBackends::from_config`].

pub mod connection;
pub mod memory;
pub mod migration;
pub mod postgres;
pub mod provider;
pub mod store;

pub use connection::DatabasePool;
pub use provider::StorageBackends;
pub use store::{AuditStore, SessionRepository};
