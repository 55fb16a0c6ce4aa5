/// Provider identifier and chat token endpoints
use crate::{
    auth::AuthContext,
    chat::Redemption,
    context::AppContext,
    db::models::{ChatToken, Identifier},
    error::ChatResult,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Build identifier and token routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/identifiers", post(register_identifier))
        .route("/api/identifiers/:identifier", get(resolve_identifier))
        .route("/api/chat-tokens", post(issue_token))
        .route("/api/chat-tokens/:token/redeem", post(redeem_token))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenRequest {
    pub identifier: String,
}

/// Token issuance response; the token record itself stays server-side
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl From<ChatToken> for IssueTokenResponse {
    fn from(token: ChatToken) -> Self {
        Self {
            token: token.token,
            expires_at: token.expires_at,
        }
    }
}

/// Get (or create) the caller's shareable identifier
async fn register_identifier(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> ChatResult<Json<Identifier>> {
    Ok(Json(ctx.identifiers.register(&auth.user_id).await?))
}

async fn resolve_identifier(
    State(ctx): State<AppContext>,
    Path(identifier): Path<String>,
) -> ChatResult<Json<Identifier>> {
    Ok(Json(ctx.identifiers.resolve(&identifier).await?))
}

/// Issue a token for a chat link; no account needed
async fn issue_token(
    State(ctx): State<AppContext>,
    Json(req): Json<IssueTokenRequest>,
) -> ChatResult<(StatusCode, Json<IssueTokenResponse>)> {
    let token = ctx.chat_tokens.issue(&req.identifier).await?;
    Ok((StatusCode::CREATED, Json(token.into())))
}

async fn redeem_token(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(token): Path<String>,
) -> ChatResult<Json<Redemption>> {
    Ok(Json(ctx.chat_tokens.redeem(&token, &auth.user_id).await?))
}
