/// MaystorFix chat backend
///
/// Loads configuration from the environment, migrates the database, starts
/// the background jobs and serves the REST and WebSocket API.
use maystorfix::{
    config::ServerConfig, context::AppContext, error::ChatResult, jobs, server,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ChatResult<()> {
    // Load configuration
    let config = ServerConfig::from_env()?;

    init_logging(&config.logging.level, config.logging.json);

    tracing::info!(
        version = %config.service.version,
        database = %config.storage.database.display(),
        "Starting MaystorFix chat backend"
    );

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| "maystorfix=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
