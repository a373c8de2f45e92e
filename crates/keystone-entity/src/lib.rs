//! # keystone-entity
//!
//! Domain entity models for Keystone. `Session` is a database row owned
//! by the session store; `UserSnapshot` is the view of an account handed
//! out by the user collaborator; `AuditEvent` is the queryable projection
//! of a domain event.

pub mod audit;
pub mod session;
pub mod user;
