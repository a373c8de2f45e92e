//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use keystone_auth::{
    Argon2PasswordHasher, AuthService, CommandValidator, LoginCommand, MemoryRateLimiter,
    MemoryUserService, PolicyPasswordValidator, RegisterCommand,
};
use keystone_bus::EventBus;
use keystone_bus::broker::MemoryBroker;
use keystone_core::config::AppConfig;
use keystone_core::types::id::UserId;
use keystone_database::SessionRepository;
use keystone_database::memory::{
    MemoryAuditStore, MemorySessionRepository, MemoryTransactionManager,
};
use keystone_entity::audit::AuditEvent;
use keystone_workflow::{AuditTrailService, WorkflowOrchestrator};

/// A strong password accepted by the default policy.
pub const PASSWORD: &str = "Vivid-Lantern-93-Orbit";
/// A second strong password.
pub const NEW_PASSWORD: &str = "Quiet-Harbor-71-Meteor";

/// Test application context
pub struct TestApp {
    /// Auth use cases
    pub auth: AuthService,
    /// User store, publishing lifecycle events
    pub users: MemoryUserService,
    /// Session store
    pub sessions: MemorySessionRepository,
    /// Audit store
    pub audit: MemoryAuditStore,
    /// Broker under the bus
    pub broker: MemoryBroker,
    /// Running workflows
    pub orchestrator: WorkflowOrchestrator,
    /// Application config
    pub config: AppConfig,
}

impl TestApp {
    /// Create and initialize a new test application
    pub async fn new() -> Self {
        let config = AppConfig::load("tests/fixtures", "test").expect("Failed to load test config");

        let broker = MemoryBroker::new();
        let bus = EventBus::new(config.bus.clone(), Arc::new(broker.clone()));
        let hasher =
            Arc::new(Argon2PasswordHasher::new(&config.auth).expect("Failed to build hasher"));
        let users = MemoryUserService::new(hasher.clone()).with_bus(bus.clone());
        let sessions = MemorySessionRepository::new();
        let audit = MemoryAuditStore::new();

        let auth = AuthService::new(
            Arc::new(MemoryTransactionManager::new()),
            Arc::new(sessions.clone()),
            Arc::new(users.clone()),
            Arc::new(MemoryRateLimiter::new(&config.rate_limit)),
            hasher,
            CommandValidator::new(Arc::new(PolicyPasswordValidator::new(&config.auth))),
            bus.clone(),
            config.session.clone(),
        );
        let orchestrator = WorkflowOrchestrator::new(
            config.workflow.clone(),
            &config.session,
            bus,
            auth.clone(),
            AuditTrailService::new(Arc::new(audit.clone())),
        );
        orchestrator
            .initialize()
            .await
            .expect("Failed to initialize workflows");

        Self {
            auth,
            users,
            sessions,
            audit,
            broker,
            orchestrator,
            config,
        }
    }

    /// Register a user through the auth service
    pub async fn register(&self, email: &str) -> keystone_auth::LoginResult {
        self.auth
            .register(RegisterCommand {
                email: email.to_string(),
                password: PASSWORD.to_string(),
                name: Some("Test User".to_string()),
                ip_address: "10.0.0.1".to_string(),
                user_agent: "firefox".to_string(),
            })
            .await
            .expect("Failed to register")
    }

    /// Build a login command from a given device
    pub fn login_command(email: &str, password: &str, ip: &str) -> LoginCommand {
        LoginCommand {
            email: email.to_string(),
            password: password.to_string(),
            ip_address: ip.to_string(),
            user_agent: "firefox".to_string(),
        }
    }

    /// Number of sessions owned by `user_id`
    pub async fn session_count(&self, user_id: UserId) -> usize {
        self.sessions
            .find_by_user(user_id)
            .await
            .expect("Failed to list sessions")
            .len()
    }

    /// Poll until `user_id` owns `expected` sessions
    pub async fn wait_for_sessions(&self, user_id: UserId, expected: usize) -> bool {
        for _ in 0..200 {
            if self.session_count(user_id).await == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Audit records with `action` attributed to `user_id`
    pub async fn audit_records(&self, action: &str, user_id: UserId) -> Vec<AuditEvent> {
        self.audit
            .all()
            .await
            .into_iter()
            .filter(|a| a.action == action && a.user_id == Some(user_id))
            .collect()
    }

    /// Poll until at least one matching audit record exists
    pub async fn wait_for_audit(&self, action: &str, user_id: UserId) -> Vec<AuditEvent> {
        for _ in 0..200 {
            let found = self.audit_records(action, user_id).await;
            if !found.is_empty() {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Vec::new()
    }

    /// Stop the workflows
    pub async fn shutdown(&self) {
        self.orchestrator
            .shutdown("test finished")
            .await
            .expect("Failed to shut down");
    }
}
