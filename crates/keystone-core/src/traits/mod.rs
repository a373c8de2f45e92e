//! Collaborator traits defined in `keystone-core` and implemented by other
//! crates.
//!
//! Traits that only need core types live here. Store traits that speak in
//! entity types are declared next to their implementations in
//! `keystone-database` and `keystone-auth`.

pub mod password;
pub mod rate_limit;
pub mod transaction;

pub use password::{PasswordCheck, PasswordHasher, PasswordValidator};
pub use rate_limit::RateLimiter;
pub use transaction::{Compensation, TransactionManager, TxContext, complete, execute_in_transaction};
