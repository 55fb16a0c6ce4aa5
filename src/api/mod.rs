/// REST routes and handlers
pub mod accounts;
pub mod cases;
pub mod conversations;
pub mod health;
pub mod identifiers;
pub mod middleware;
pub mod notifications;

use crate::{context::AppContext, gateway::ws};
use axum::{routing::get, Router};

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(accounts::routes())
        .merge(identifiers::routes())
        .merge(conversations::routes())
        .merge(notifications::routes())
        .merge(cases::routes())
        .route("/ws", get(ws::ws_handler))
}
