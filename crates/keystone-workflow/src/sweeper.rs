//! Periodic removal of expired sessions.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use keystone_auth::AuthService;
use keystone_core::AppError;
use keystone_core::result::AppResult;

/// Runs [`AuthService::cleanup_expired_sessions`] on a fixed interval.
pub struct SessionSweeper {
    auth: AuthService,
    interval: Duration,
    scheduler: Mutex<Option<JobScheduler>>,
}

impl std::fmt::Debug for SessionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSweeper")
            .field("interval", &self.interval)
            .finish()
    }
}

impl SessionSweeper {
    /// Create a sweeper firing every `interval`.
    pub fn new(auth: AuthService, interval: Duration) -> Self {
        Self {
            auth,
            interval,
            scheduler: Mutex::new(None),
        }
    }

    /// Create a sweeper firing every `minutes` minutes.
    pub fn every_minutes(auth: AuthService, minutes: u64) -> Self {
        Self::new(auth, Duration::from_secs(minutes.max(1) * 60))
    }

    /// Sweep once, now.
    pub async fn run_once(&self) -> AppResult<u64> {
        let removed = self.auth.cleanup_expired_sessions().await?;
        debug!(removed, "Expired session sweep finished");
        Ok(removed)
    }

    /// Whether the schedule is running.
    pub async fn is_running(&self) -> bool {
        self.scheduler.lock().await.is_some()
    }

    /// Start the schedule. Starting a running sweeper is a no-op.
    pub async fn start(&self) -> AppResult<()> {
        let mut slot = self.scheduler.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {}", e)))?;

        let auth = self.auth.clone();
        let job = Job::new_repeated_async(self.interval, move |_uuid, _lock| {
            let auth = auth.clone();
            Box::pin(async move {
                match auth.cleanup_expired_sessions().await {
                    Ok(removed) => debug!(removed, "Expired session sweep finished"),
                    Err(e) => error!(error = %e, "Expired session sweep failed"),
                }
            })
        })
        .map_err(|e| AppError::internal(format!("Failed to create session sweep job: {}", e)))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::internal(format!("Failed to add session sweep job: {}", e)))?;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {}", e)))?;

        info!(interval_secs = self.interval.as_secs(), "Session sweeper started");
        *slot = Some(scheduler);
        Ok(())
    }

    /// Stop the schedule. Stopping a stopped sweeper is a no-op.
    pub async fn stop(&self) -> AppResult<()> {
        let Some(mut scheduler) = self.scheduler.lock().await.take() else {
            return Ok(());
        };
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown scheduler: {}", e)))?;
        info!("Session sweeper stopped");
        Ok(())
    }
}
