//! Keystone server: authentication, session and workflow core.
//!
//! Main entry point that wires all crates together and runs the event
//! workflows until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use keystone_auth::{
    Argon2PasswordHasher, AuthService, CommandValidator, MemoryRateLimiter, MemoryUserService,
    PolicyPasswordValidator,
};
use keystone_bus::EventBus;
use keystone_core::AppError;
use keystone_core::config::AppConfig;
use keystone_database::StorageBackends;
use keystone_workflow::{AuditTrailService, WorkflowOrchestrator};

/// Interval between bus health checks.
const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Keystone server
#[derive(Debug, Parser)]
#[command(name = "keystone-server", version, about)]
struct Cli {
    /// Environment overlay to load on top of `default.toml`
    #[arg(long, default_value = "development")]
    env: String,

    /// Directory holding the configuration files
    #[arg(long, default_value = "config")]
    config_dir: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config_dir, &cli.env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!(env = %cli.env, config_dir = %cli.config_dir, "Configuration loaded");

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting Keystone v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Storage backends ─────────────────────────────────
    let backends = StorageBackends::from_config(&config.database).await?;

    // ── Step 2: Broker + event bus ───────────────────────────────
    let broker = keystone_bus::broker::from_config(&config.bus)?;
    let bus = EventBus::new(config.bus.clone(), broker);

    // ── Step 3: Auth collaborators ───────────────────────────────
    let hasher = Arc::new(Argon2PasswordHasher::new(&config.auth)?);
    let users = MemoryUserService::new(hasher.clone()).with_bus(bus.clone());
    let validator = CommandValidator::new(Arc::new(PolicyPasswordValidator::new(&config.auth)));
    let auth = AuthService::new(
        Arc::clone(&backends.transactions),
        Arc::clone(&backends.sessions),
        Arc::new(users),
        Arc::new(MemoryRateLimiter::new(&config.rate_limit)),
        hasher,
        validator,
        bus.clone(),
        config.session.clone(),
    );
    tracing::info!("Authentication service initialized");

    // ── Step 4: Workflows ────────────────────────────────────────
    let orchestrator = WorkflowOrchestrator::new(
        config.workflow.clone(),
        &config.session,
        bus,
        auth,
        AuditTrailService::new(Arc::clone(&backends.audit)),
    );
    orchestrator.initialize().await?;
    tracing::info!("Keystone is running");

    // ── Step 5: Run until signalled ──────────────────────────────
    let signal = shutdown_signal();
    tokio::pin!(signal);
    let mut health = tokio::time::interval(HEALTH_INTERVAL);
    health.tick().await;
    loop {
        tokio::select! {
            _ = &mut signal => break,
            _ = health.tick() => {
                if let Err(e) = orchestrator.health().await {
                    tracing::warn!(error = %e, "Health check failed");
                }
                if let Err(e) = backends.health().await {
                    tracing::warn!(error = %e, "Storage health check failed");
                }
            }
        }
    }

    // ── Step 6: Graceful shutdown ────────────────────────────────
    tracing::info!("Shutdown signal received, starting graceful shutdown...");
    if let Err(e) = orchestrator.shutdown("shutdown signal received").await {
        tracing::error!("Workflow shutdown failed: {}", e);
    }
    backends.close().await;
    tracing::info!("Keystone stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
