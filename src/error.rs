/// Unified error types for the MaystorFix chat backend
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum ChatError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration ledger errors
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Unknown token, conversation, case, message or account
    #[error("Not found: {0}")]
    NotFound(String),

    /// Chat token past its expiry
    #[error("Expired: {0}")]
    Expired(String),

    /// Chat token already consumed by another user
    #[error("Already used: {0}")]
    AlreadyUsed(String),

    /// Provider already bid on this case
    #[error("Duplicate bid: {0}")]
    DuplicateBid(String),

    /// Bidder cap reached or case not accepting bids
    #[error("Bidding closed: {0}")]
    BiddingClosed(String),

    /// Participant or role check failed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Missing or invalid credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict errors (e.g., phone already registered)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Machine-readable error code returned to REST clients
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::NotFound(_) => "NotFound",
            ChatError::Expired(_) => "Expired",
            ChatError::AlreadyUsed(_) => "AlreadyUsed",
            ChatError::DuplicateBid(_) => "DuplicateBid",
            ChatError::BiddingClosed(_) => "BiddingClosed",
            ChatError::Forbidden(_) => "Forbidden",
            ChatError::Unauthorized(_) => "Unauthorized",
            ChatError::Validation(_) => "InvalidRequest",
            ChatError::Conflict(_) => "Conflict",
            ChatError::Database(_)
            | ChatError::Migration(_)
            | ChatError::Internal(_)
            | ChatError::Io(_) => "InternalServerError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Expired(_) => StatusCode::GONE,
            ChatError::AlreadyUsed(_)
            | ChatError::DuplicateBid(_)
            | ChatError::BiddingClosed(_)
            | ChatError::Conflict(_) => StatusCode::CONFLICT,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Database(_)
            | ChatError::Migration(_)
            | ChatError::Internal(_)
            | ChatError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True when a database error is a UNIQUE constraint violation
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert ChatError to HTTP response
impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self);
            "Internal server error".to_string() // Don't leak details
        } else {
            self.to_string()
        };

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for service operations
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ChatError::Expired("t".into()).status(), StatusCode::GONE);
        assert_eq!(ChatError::BiddingClosed("c".into()).status(), StatusCode::CONFLICT);
        assert_eq!(ChatError::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ChatError::Internal("boom".into()).code(), "InternalServerError");
    }
}
