/// Background task implementations
use crate::{context::AppContext, db, error::ChatResult};

/// Delete chat tokens whose expiry has passed
pub async fn cleanup_expired_chat_tokens(ctx: &AppContext) -> ChatResult<u64> {
    ctx.chat_tokens.cleanup_expired().await
}

/// Cleanup expired sessions
pub async fn cleanup_expired_sessions(ctx: &AppContext) -> ChatResult<u64> {
    ctx.account_manager.cleanup_expired_sessions().await
}

/// Health check - verify the database answers and log socket counts
pub async fn health_check(ctx: &AppContext) -> ChatResult<()> {
    db::test_connection(&ctx.db).await?;

    let stats = ctx.registry.stats().await;
    tracing::debug!(
        sockets = stats.sockets,
        users = stats.users,
        rooms = stats.rooms,
        "Health check passed"
    );
    Ok(())
}
