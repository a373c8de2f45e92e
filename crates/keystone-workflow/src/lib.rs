//! # keystone-workflow
//!
//! Cross-module side effects wired purely through the event bus.
//!
//! - [`audit`] records one audit entry per lifecycle event
//! - [`cleanup`] cascades session removal when a user is deactivated,
//!   suspended or deleted
//! - [`lifecycle`] dispatches user lifecycle events to pluggable actions
//! - [`sweeper`] periodically removes expired sessions
//! - [`WorkflowOrchestrator`] subscribes all of the above and owns the
//!   start/stop sequence
//!
//! Every handler tolerates duplicate delivery.

pub mod audit;
pub mod cleanup;
pub mod lifecycle;
pub mod orchestrator;
pub mod sweeper;

pub use audit::{AuditHandler, AuditTrailService};
pub use cleanup::{
    CLEANUP_ACTION, SessionCleanup, UserDeactivatedHandler, UserDeletedHandler,
    UserStatusChangedHandler,
};
pub use lifecycle::{LifecycleActions, NoopLifecycleActions, UserLifecycleHandler};
pub use orchestrator::{WorkflowOrchestrator, WorkflowStatus};
pub use sweeper::SessionSweeper;
