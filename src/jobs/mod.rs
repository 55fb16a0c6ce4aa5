use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::expired_token_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::expired_session_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    fn every(seconds: u64) -> tokio::time::Interval {
        interval(Duration::from_secs(seconds.max(1)))
    }

    /// Delete expired chat tokens. A failed run is retried on the next tick.
    async fn expired_token_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = Self::every(scheduler.context.config.jobs.token_cleanup_interval);

        loop {
            interval.tick().await;

            match tasks::cleanup_expired_chat_tokens(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired chat tokens", count);
                    }
                }
                Err(e) => error!("Failed to cleanup expired chat tokens: {}", e),
            }
        }
    }

    /// Cleanup expired sessions (hourly by default)
    async fn expired_session_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = Self::every(scheduler.context.config.jobs.session_cleanup_interval);

        loop {
            interval.tick().await;

            match tasks::cleanup_expired_sessions(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => error!("Failed to cleanup expired sessions: {}", e),
            }
        }
    }

    /// Health check job (every 5 minutes by default)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = Self::every(scheduler.context.config.jobs.health_check_interval);

        loop {
            interval.tick().await;

            match tasks::health_check(&scheduler.context).await {
                Ok(_) => {
                    // Silent success - health is good
                }
                Err(e) => error!("Health check failed: {}", e),
            }
        }
    }
}
