/// Notification polling endpoints
use crate::{
    auth::AuthContext,
    context::AppContext,
    db::models::Notification,
    error::ChatResult,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Build notification routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/read-all", post(mark_all_read))
        .route("/api/notifications/:id/read", post(mark_read))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkedRead {
    pub updated: u64,
}

async fn list_notifications(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(params): Query<ListParams>,
) -> ChatResult<Json<Vec<Notification>>> {
    let notifications = ctx
        .notifications
        .list(&auth.user_id, params.unread_only, params.limit, params.offset)
        .await?;
    Ok(Json(notifications))
}

async fn unread_count(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> ChatResult<Json<UnreadCount>> {
    let count = ctx.notifications.unread_count(&auth.user_id).await?;
    Ok(Json(UnreadCount { count }))
}

async fn mark_read(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ChatResult<Json<Notification>> {
    Ok(Json(ctx.notifications.mark_read(&id, &auth.user_id).await?))
}

async fn mark_all_read(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> ChatResult<Json<MarkedRead>> {
    let updated = ctx.notifications.mark_all_read(&auth.user_id).await?;
    Ok(Json(MarkedRead { updated }))
}
