/// Authentication extractors
use crate::{
    account::ValidatedSession,
    api::middleware::extract_bearer_token,
    context::AppContext,
    db::models::UserRole,
    error::ChatError,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Authenticated caller - extracts and validates the bearer session
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub session: ValidatedSession,
}

impl AuthContext {
    pub fn role(&self) -> UserRole {
        self.session.role
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = ChatError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| ChatError::Unauthorized("Missing authorization header".to_string()))?;

        let session = state.account_manager.validate_access_token(&token).await?;

        Ok(AuthContext {
            user_id: session.user_id.clone(),
            session,
        })
    }
}
