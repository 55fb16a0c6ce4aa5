/// Health check endpoint
///
/// Reports database connectivity and the live socket counts held by the
/// connection registry.
use crate::{context::AppContext, db, gateway::RegistryStats};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use std::time::Instant;

/// Health status response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// "healthy" or "unhealthy"
    pub status: &'static str,
    pub version: String,
    pub uptime_seconds: u64,
    pub database_ms: Option<u64>,
    pub connections: RegistryStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Build health check routes
pub fn routes() -> Router<AppContext> {
    Router::new().route("/health", get(health))
}

pub async fn health(State(ctx): State<AppContext>) -> (StatusCode, Json<HealthStatus>) {
    let start = Instant::now();
    let database = db::test_connection(&ctx.db).await;
    let connections = ctx.registry.stats().await;

    let (code, status, database_ms, error) = match database {
        Ok(()) => (
            StatusCode::OK,
            "healthy",
            Some(start.elapsed().as_millis() as u64),
            None,
        ),
        Err(e) => {
            tracing::error!("Health check database probe failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "unhealthy",
                None,
                Some("Database unavailable".to_string()),
            )
        }
    };

    (
        code,
        Json(HealthStatus {
            status,
            version: ctx.config.service.version.clone(),
            uptime_seconds: ctx.started_at.elapsed().as_secs(),
            database_ms,
            connections,
            error,
        }),
    )
}
