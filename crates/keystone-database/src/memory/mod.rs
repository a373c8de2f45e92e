//! In-memory backends.
//!
//! Used by the test suites and by the server when `database.backend` is
//! `memory`. Mutations made under a transaction are applied immediately and
//! undone on rollback.

pub mod audit;
pub mod session;
pub mod transaction;

pub use audit::MemoryAuditStore;
pub use session::MemorySessionRepository;
pub use transaction::MemoryTransactionManager;
