/// Account endpoints: registration, login and logout
use crate::{
    account::{LoginRequest, RegisterRequest, SessionResponse},
    auth::AuthContext,
    context::AppContext,
    error::ChatResult,
};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

/// Build account routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
}

/// Register endpoint; the new account is logged in straight away
async fn register(
    State(ctx): State<AppContext>,
    Json(req): Json<RegisterRequest>,
) -> ChatResult<(StatusCode, Json<SessionResponse>)> {
    let user = ctx
        .account_manager
        .register(&req.name, &req.phone, &req.password, req.role)
        .await?;
    let session = ctx.account_manager.create_session(&user.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::new(&user, session.access_token, session.expires_at)),
    ))
}

async fn login(
    State(ctx): State<AppContext>,
    Json(req): Json<LoginRequest>,
) -> ChatResult<Json<SessionResponse>> {
    let (user, session) = ctx.account_manager.login(&req.phone, &req.password).await?;
    tracing::debug!(user_id = %user.id, "Logged in");
    Ok(Json(SessionResponse::new(&user, session.access_token, session.expires_at)))
}

async fn logout(State(ctx): State<AppContext>, auth: AuthContext) -> ChatResult<StatusCode> {
    ctx.account_manager
        .delete_session(&auth.session.session_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
