/// Account management
///
/// Handles registration, login and bearer session validation.

mod manager;

pub use manager::AccountManager;

use crate::db::models::{User, UserRole};
use serde::{Deserialize, Serialize};

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub phone: String,
    pub password: String,
    pub role: UserRole,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub phone: String,
    pub password: String,
}

/// Session response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_id: String,
    pub name: String,
    pub role: UserRole,
    pub access_token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl SessionResponse {
    pub fn new(user: &User, access_token: String, expires_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            user_id: user.id.clone(),
            name: user.name.clone(),
            role: user.role,
            access_token,
            expires_at,
        }
    }
}

/// Validated session from bearer token
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    pub user_id: String,
    pub session_id: String,
    pub role: UserRole,
}
