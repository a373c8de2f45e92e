//! Composition root for the event-driven workflows.
//!
//! [`WorkflowOrchestrator`] subscribes every workflow handler to the bus
//! and owns the start/stop sequence of the bus and the session sweeper.
//! Handlers never call each other; the bus is the only coupling.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use keystone_auth::AuthService;
use keystone_bus::{AsyncHandler, BusStatus, EventBus, EventHandler};
use keystone_core::AppError;
use keystone_core::config::{SessionConfig, WorkflowConfig};
use keystone_core::events::{
    AGGREGATE_SYSTEM, DomainEvent, EventMetadata, EventPayload, HealthCheckFailed,
    SystemShuttingDown, SystemStarted, Topic,
};
use keystone_core::result::AppResult;

use crate::audit::AuditTrailService;
use crate::cleanup::{
    SessionCleanup, UserDeactivatedHandler, UserDeletedHandler, UserStatusChangedHandler,
};
use crate::lifecycle::{
    LIFECYCLE_TOPICS, LifecycleActions, NoopLifecycleActions, UserLifecycleHandler,
};
use crate::sweeper::SessionSweeper;

/// Components reported in the `system.started` event.
const COMPONENTS: [&str; 4] = ["event_bus", "audit_trail", "session_cleanup", "user_lifecycle"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Registered,
    Running,
    ShutDown,
}

/// Point-in-time view of the workflow layer.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatus {
    /// Whether `initialize` completed and `shutdown` has not run.
    pub initialized: bool,
    /// Bus state and subscriptions.
    pub bus: BusStatus,
    /// Every registered handler name.
    pub handlers: Vec<String>,
    /// Whether the expired-session sweep is scheduled.
    pub sweep_running: bool,
}

/// Registers the workflow handlers and runs the bus.
pub struct WorkflowOrchestrator {
    config: WorkflowConfig,
    bus: EventBus,
    auth: AuthService,
    audit: AuditTrailService,
    sweeper: SessionSweeper,
    lifecycle: Mutex<Option<Box<dyn LifecycleActions>>>,
    token: CancellationToken,
    phase: Mutex<Phase>,
}

impl std::fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl WorkflowOrchestrator {
    /// Create an orchestrator; nothing is subscribed or started yet.
    pub fn new(
        config: WorkflowConfig,
        session: &SessionConfig,
        bus: EventBus,
        auth: AuthService,
        audit: AuditTrailService,
    ) -> Self {
        let sweeper = SessionSweeper::every_minutes(auth.clone(), session.cleanup_interval_minutes);
        Self {
            config,
            bus,
            auth,
            audit,
            sweeper,
            lifecycle: Mutex::new(Some(Box::new(NoopLifecycleActions))),
            token: CancellationToken::new(),
            phase: Mutex::new(Phase::Created),
        }
    }

    /// Replace the lifecycle actions. Takes effect at `initialize`.
    pub fn with_lifecycle_actions(self, actions: impl LifecycleActions) -> Self {
        Self {
            lifecycle: Mutex::new(Some(Box::new(actions))),
            ..self
        }
    }

    /// Override the sweep interval.
    pub fn with_sweep_interval(self, interval: Duration) -> Self {
        let sweeper = SessionSweeper::new(self.auth.clone(), interval);
        Self { sweeper, ..self }
    }

    /// The bus the orchestrator drives.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The audit trail service the handlers write to.
    pub fn audit(&self) -> &AuditTrailService {
        &self.audit
    }

    /// The expired-session sweeper.
    pub fn sweeper(&self) -> &SessionSweeper {
        &self.sweeper
    }

    /// Subscribe every handler, start the bus and the sweeper, then
    /// announce `system.started`. Calling it again is a no-op; calling it
    /// after `shutdown` fails.
    pub async fn initialize(&self) -> AppResult<()> {
        let mut phase = self.phase.lock().await;
        match *phase {
            Phase::Running => return Ok(()),
            Phase::ShutDown => {
                return Err(AppError::internal("Workflow orchestrator has been shut down"));
            }
            Phase::Created => {
                self.register_handlers().await?;
                *phase = Phase::Registered;
            }
            Phase::Registered => {}
        }

        self.bus.start().await?;
        if self.config.session_sweep_enabled {
            self.sweeper.start().await?;
        }
        *phase = Phase::Running;

        let started = SystemStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            components: COMPONENTS.iter().map(|c| c.to_string()).collect(),
        };
        if let Err(e) = self.publish_system(started).await {
            warn!(error = %e, "Failed to publish system.started");
        }

        info!(
            handlers = self.bus.handler_names().await.len(),
            sweep = self.config.session_sweep_enabled,
            "Workflow orchestrator initialized"
        );
        Ok(())
    }

    /// Announce `system.shutting_down`, stop the sweeper and the lifecycle
    /// worker, then stop the bus. Calling it again is a no-op.
    pub async fn shutdown(&self, reason: &str) -> AppResult<()> {
        let mut phase = self.phase.lock().await;
        if *phase == Phase::ShutDown {
            return Ok(());
        }
        let was_running = *phase == Phase::Running;
        *phase = Phase::ShutDown;

        if was_running {
            let event = SystemShuttingDown {
                reason: reason.to_string(),
            };
            if let Err(e) = self.publish_system(event).await {
                warn!(error = %e, "Failed to publish system.shutting_down");
            }
        }

        if let Err(e) = self.sweeper.stop().await {
            warn!(error = %e, "Failed to stop session sweeper");
        }
        self.token.cancel();
        self.bus.stop().await?;

        info!(reason, "Workflow orchestrator shut down");
        Ok(())
    }

    /// Check the bus. A failure is announced on `system.health_check_failed`
    /// when the bus can still publish, and returned.
    pub async fn health(&self) -> AppResult<()> {
        let Err(e) = self.bus.health().await else {
            return Ok(());
        };
        let failed = HealthCheckFailed {
            component: "event_bus".to_string(),
            error: e.to_string(),
        };
        if let Err(publish_err) = self.publish_system(failed).await {
            warn!(error = %publish_err, "Failed to publish system.health_check_failed");
        }
        Err(e)
    }

    /// Snapshot of the workflow layer.
    pub async fn status(&self) -> WorkflowStatus {
        WorkflowStatus {
            initialized: *self.phase.lock().await == Phase::Running,
            bus: self.bus.status().await,
            handlers: self.bus.handler_names().await,
            sweep_running: self.sweeper.is_running().await,
        }
    }

    async fn register_handlers(&self) -> AppResult<()> {
        // Cleanup runs ahead of audit on shared topics.
        let cleanup = SessionCleanup::new(self.auth.clone(), self.audit.clone());
        self.bus
            .subscribe(
                Topic::UserStatusChanged,
                Arc::new(UserStatusChangedHandler::new(cleanup.clone())),
            )
            .await?;
        self.bus
            .subscribe(
                Topic::UserDeleted,
                Arc::new(UserDeletedHandler::new(cleanup.clone())),
            )
            .await?;
        self.bus
            .subscribe(
                Topic::UserDeactivated,
                Arc::new(UserDeactivatedHandler::new(cleanup)),
            )
            .await?;

        self.audit.register_audit_handlers(&self.bus).await?;

        let actions = self
            .lifecycle
            .lock()
            .await
            .take()
            .unwrap_or_else(|| Box::new(NoopLifecycleActions));
        let lifecycle: Arc<dyn EventHandler> = Arc::new(UserLifecycleHandler::from_boxed(actions));
        let lifecycle: Arc<dyn EventHandler> = if self.config.async_lifecycle_handler {
            Arc::new(AsyncHandler::new(
                lifecycle,
                self.config.async_buffer_size,
                self.token.child_token(),
            ))
        } else {
            lifecycle
        };
        self.bus.subscribe_all(&LIFECYCLE_TOPICS, lifecycle).await?;
        Ok(())
    }

    async fn publish_system(&self, payload: impl Into<EventPayload>) -> AppResult<()> {
        let event = DomainEvent::new(
            AGGREGATE_SYSTEM,
            AGGREGATE_SYSTEM,
            payload,
            EventMetadata::from_source(self.config.source_module.clone()),
        );
        self.bus.publish(&event).await
    }
}
