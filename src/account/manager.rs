/// Account manager: users, password hashing and bearer sessions
use crate::{
    account::ValidatedSession,
    config::ServerConfig,
    db::models::{Session, User, UserRole},
    error::{ChatError, ChatResult},
};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Access token claims
#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    sid: String,
    iat: i64,
    exp: i64,
}

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
    config: Arc<ServerConfig>,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        Self { db, config }
    }

    /// Register a new account
    pub async fn register(
        &self,
        name: &str,
        phone: &str,
        password: &str,
        role: UserRole,
    ) -> ChatResult<User> {
        let name = name.trim();
        let phone = normalize_phone(phone);

        if name.is_empty() {
            return Err(ChatError::Validation("Name cannot be empty".to_string()));
        }
        if phone.len() < 6 {
            return Err(ChatError::Validation("Invalid phone number".to_string()));
        }
        if password.len() < 8 {
            return Err(ChatError::Validation(
                "Password must be at least 8 characters".to_string(),
            ));
        }

        let salt = SaltString::generate(&mut rand::rngs::OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| ChatError::Internal(format!("Password hashing failed: {}", e)))?
            .to_string();

        let user = User {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            phone,
            password_hash,
            role,
            created_at: Utc::now(),
        };

        let result = sqlx::query(
            "INSERT INTO users (id, name, phone, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.phone)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.created_at)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => {
                tracing::info!(user_id = %user.id, role = user.role.as_str(), "Registered account");
                Ok(user)
            }
            Err(e) if ChatError::is_unique_violation(&e) => {
                Err(ChatError::Conflict("Phone number already registered".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Verify credentials and create a session
    pub async fn login(&self, phone: &str, password: &str) -> ChatResult<(User, Session)> {
        let phone = normalize_phone(phone);
        let user: User = sqlx::query_as("SELECT * FROM users WHERE phone = ?1")
            .bind(&phone)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ChatError::Unauthorized("Invalid credentials".to_string()))?;

        let parsed = PasswordHash::new(&user.password_hash)
            .map_err(|e| ChatError::Internal(format!("Stored password hash invalid: {}", e)))?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            return Err(ChatError::Unauthorized("Invalid credentials".to_string()));
        }

        let session = self.create_session(&user.id).await?;
        Ok((user, session))
    }

    /// Create a session and its signed access token
    pub async fn create_session(&self, user_id: &str) -> ChatResult<Session> {
        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.config.authentication.session_ttl);

        let claims = AccessClaims {
            sub: user_id.to_string(),
            sid: session_id.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.authentication.jwt_secret.as_bytes()),
        )
        .map_err(|e| ChatError::Internal(format!("Failed to sign access token: {}", e)))?;

        sqlx::query(
            "INSERT INTO sessions (id, user_id, access_token, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&session_id)
        .bind(user_id)
        .bind(&access_token)
        .bind(now)
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        Ok(Session {
            id: session_id,
            user_id: user_id.to_string(),
            access_token,
            created_at: now,
            expires_at,
        })
    }

    /// Validate access token and return session info
    pub async fn validate_access_token(&self, token: &str) -> ChatResult<ValidatedSession> {
        let decoding_key =
            DecodingKey::from_secret(self.config.authentication.jwt_secret.as_bytes());
        let claims = decode::<AccessClaims>(token, &decoding_key, &Validation::new(Algorithm::HS256))
            .map_err(|e| {
                tracing::debug!("Access token rejected: {}", e);
                ChatError::Unauthorized("Invalid or expired access token".to_string())
            })?
            .claims;

        let row: Option<(String, UserRole, chrono::DateTime<Utc>)> = sqlx::query_as(
            "SELECT s.access_token, u.role, s.expires_at
             FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.id = ?1 AND s.user_id = ?2",
        )
        .bind(&claims.sid)
        .bind(&claims.sub)
        .fetch_optional(&self.db)
        .await?;

        let (stored_token, role, expires_at) =
            row.ok_or_else(|| ChatError::Unauthorized("Session not found".to_string()))?;

        if stored_token != token {
            return Err(ChatError::Unauthorized("Session token mismatch".to_string()));
        }
        if Utc::now() > expires_at {
            return Err(ChatError::Unauthorized("Session expired".to_string()));
        }

        Ok(ValidatedSession {
            user_id: claims.sub,
            session_id: claims.sid,
            role,
        })
    }

    /// Delete a session (logout)
    pub async fn delete_session(&self, session_id: &str) -> ChatResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(session_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Remove sessions whose expiry has passed
    pub async fn cleanup_expired_sessions(&self) -> ChatResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?1")
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(sessions_deleted = deleted, "Cleaned up expired sessions");
        } else {
            tracing::debug!("Session cleanup: no expired sessions found");
        }

        Ok(deleted)
    }
}

/// Strip spaces and dashes so "+359 88-123" and "+35988123" match
fn normalize_phone(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}
