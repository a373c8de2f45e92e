//! Audit trail: one handler per catalog topic, projecting domain events
//! into queryable audit records.

pub mod handler;
pub mod mapping;
pub mod service;

pub use handler::AuditHandler;
pub use mapping::{DEFAULT_ACTION, DEFAULT_RESOURCE, audit_action};
pub use service::AuditTrailService;
