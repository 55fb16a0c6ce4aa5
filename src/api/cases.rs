/// Case and bid endpoints
use crate::{
    auth::AuthContext,
    cases::{CaseOutcome, NewBid, NewCase},
    context::AppContext,
    db::models::{Bid, Case, CaseDecline},
    error::ChatResult,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build case routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/cases", post(create_case))
        .route("/api/cases/available", get(list_available))
        .route("/api/cases/:id", get(get_case))
        .route("/api/cases/:id/bids", get(list_bids).post(place_bid))
        .route("/api/cases/:id/bids/:bid_id/accept", post(accept_bid))
        .route("/api/cases/:id/decline", post(decline_case))
        .route("/api/cases/:id/complete", post(complete_case))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeclineRequest {
    pub reason: Option<String>,
}

async fn create_case(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<NewCase>,
) -> ChatResult<(StatusCode, Json<CaseOutcome>)> {
    let outcome = ctx.cases.create_case(&auth.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Open cases the calling provider can still bid on
async fn list_available(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> ChatResult<Json<Vec<Case>>> {
    Ok(Json(ctx.cases.list_available(&auth.user_id).await?))
}

async fn get_case(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ChatResult<Json<Case>> {
    Ok(Json(
        ctx.cases
            .get_visible(&id, &auth.user_id, auth.role())
            .await?,
    ))
}

async fn list_bids(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ChatResult<Json<Vec<Bid>>> {
    Ok(Json(ctx.cases.list_bids(&id, &auth.user_id).await?))
}

async fn place_bid(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(req): Json<NewBid>,
) -> ChatResult<(StatusCode, Json<Bid>)> {
    let bid = ctx.cases.place_bid(&id, &auth.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(bid)))
}

async fn accept_bid(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path((id, bid_id)): Path<(String, String)>,
) -> ChatResult<Json<CaseOutcome>> {
    Ok(Json(ctx.cases.accept_bid(&id, &auth.user_id, &bid_id).await?))
}

async fn decline_case(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(req): Json<DeclineRequest>,
) -> ChatResult<Json<CaseDecline>> {
    Ok(Json(
        ctx.cases
            .decline_case(&id, &auth.user_id, req.reason)
            .await?,
    ))
}

async fn complete_case(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ChatResult<Json<Case>> {
    Ok(Json(ctx.cases.complete_case(&id, &auth.user_id).await?))
}
