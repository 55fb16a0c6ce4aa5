/// Conversation and message endpoints
use crate::{
    auth::AuthContext,
    context::AppContext,
    db::models::{Conversation, MessageType, MessageView},
    error::ChatResult,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Build conversation routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/:id", get(get_conversation))
        .route("/api/conversations/:id/close", post(close_conversation))
        .route(
            "/api/conversations/:id/messages",
            get(list_messages).post(send_message),
        )
        .route("/api/conversations/:id/read", post(mark_read))
        .route(
            "/api/messages/:id",
            patch(edit_message).delete(delete_message),
        )
        .route("/api/unread-count", get(unread_count))
}

/// Conversation with the caller's unread counter
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: i64,
}

impl ConversationSummary {
    fn for_user(conversation: Conversation, user_id: &str) -> Self {
        let unread_count = conversation.unread_for(user_id);
        Self {
            conversation,
            unread_count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub before: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub count: i64,
}

async fn list_conversations(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> ChatResult<Json<Vec<ConversationSummary>>> {
    let conversations = ctx.conversations.list_for_user(&auth.user_id).await?;
    Ok(Json(
        conversations
            .into_iter()
            .map(|c| ConversationSummary::for_user(c, &auth.user_id))
            .collect(),
    ))
}

async fn get_conversation(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ChatResult<Json<ConversationSummary>> {
    let conversation = ctx
        .conversations
        .get_for_participant(&id, &auth.user_id)
        .await?;
    Ok(Json(ConversationSummary::for_user(conversation, &auth.user_id)))
}

async fn close_conversation(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ChatResult<Json<Conversation>> {
    Ok(Json(ctx.conversations.close(&id, &auth.user_id).await?))
}

/// Message history page, oldest first
async fn list_messages(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> ChatResult<Json<Vec<MessageView>>> {
    ctx.conversations
        .get_for_participant(&id, &auth.user_id)
        .await?;
    let messages = ctx
        .messages
        .list(&id, params.before.as_deref(), params.limit)
        .await?;
    Ok(Json(messages))
}

/// Send without a socket; live delivery and notifications are the same as
/// for `message:send`
async fn send_message(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> ChatResult<(StatusCode, Json<MessageView>)> {
    let message = ctx
        .gateway
        .send_message(
            &auth.user_id,
            None,
            &id,
            req.message_type,
            &req.body,
            req.attachments,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn mark_read(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(req): Json<MarkReadRequest>,
) -> ChatResult<StatusCode> {
    ctx.gateway
        .mark_read(&auth.user_id, &id, &req.message_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn edit_message(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(req): Json<EditMessageRequest>,
) -> ChatResult<Json<MessageView>> {
    Ok(Json(ctx.messages.edit(&id, &auth.user_id, &req.body).await?))
}

async fn delete_message(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ChatResult<Json<MessageView>> {
    Ok(Json(ctx.messages.delete(&id, &auth.user_id).await?))
}

async fn unread_count(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> ChatResult<Json<UnreadCount>> {
    let count = ctx.conversations.unread_total(&auth.user_id).await?;
    Ok(Json(UnreadCount { count }))
}
