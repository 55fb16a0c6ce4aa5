/// Chat token manager: single-use, time-limited tokens that open a conversation
///
/// A token is issued against a provider identifier. Redeeming it marks it
/// used and creates (or resumes) the customer/provider conversation. The
/// conditional `UPDATE ... WHERE is_used = 0` is the first write of the
/// redemption transaction, so two concurrent redeemers cannot both win.
use crate::{
    chat::ConversationStore,
    db::models::{ChatToken, Conversation},
    error::{ChatError, ChatResult},
};
use chrono::{Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use sqlx::SqlitePool;

const TOKEN_LENGTH: usize = 32;
const TOKEN_COLUMNS: &str =
    "token, provider_identifier, user_id, is_used, used_at, conversation_id, expires_at, created_at";

/// Result of a successful redemption
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub conversation: Conversation,
    pub is_new_conversation: bool,
}

/// Chat token manager
#[derive(Clone)]
pub struct ChatTokenManager {
    db: SqlitePool,
    ttl: Duration,
}

impl ChatTokenManager {
    pub fn new(db: SqlitePool, ttl_seconds: i64) -> Self {
        Self {
            db,
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Generate a new random token
    pub fn generate_token() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect()
    }

    /// Issue a fresh token for a provider identifier
    pub async fn issue(&self, provider_identifier: &str) -> ChatResult<ChatToken> {
        let known: Option<i64> = sqlx::query_scalar("SELECT 1 FROM identifiers WHERE identifier = ?1")
            .bind(provider_identifier)
            .fetch_optional(&self.db)
            .await?;
        if known.is_none() {
            return Err(ChatError::NotFound(format!(
                "Unknown identifier {}",
                provider_identifier
            )));
        }

        let now = Utc::now();
        let token = ChatToken {
            token: Self::generate_token(),
            provider_identifier: provider_identifier.to_string(),
            user_id: None,
            is_used: false,
            used_at: None,
            conversation_id: None,
            expires_at: now + self.ttl,
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO chat_tokens (token, provider_identifier, is_used, expires_at, created_at)
             VALUES (?1, ?2, 0, ?3, ?4)",
        )
        .bind(&token.token)
        .bind(&token.provider_identifier)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&self.db)
        .await?;

        tracing::debug!(provider_identifier, expires_at = %token.expires_at, "Issued chat token");

        Ok(token)
    }

    /// Get a token record
    pub async fn get(&self, token: &str) -> ChatResult<ChatToken> {
        sqlx::query_as(&format!("SELECT {TOKEN_COLUMNS} FROM chat_tokens WHERE token = ?1"))
            .bind(token)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ChatError::NotFound("Chat token not found".to_string()))
    }

    /// Redeem a token on behalf of `user_id`.
    ///
    /// Repeating a redemption by the same user returns the same conversation
    /// with `is_new_conversation = false`.
    pub async fn redeem(&self, token: &str, user_id: &str) -> ChatResult<Redemption> {
        let provider_id: String = {
            let record = self.get(token).await?;
            if let Some(existing) = self.diagnose(&record, user_id).await? {
                return Ok(existing);
            }
            self.provider_for(&record.provider_identifier).await?
        };
        if provider_id == user_id {
            return Err(ChatError::Forbidden(
                "Providers cannot redeem their own chat token".to_string(),
            ));
        }

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let claimed = sqlx::query(
            "UPDATE chat_tokens SET is_used = 1, used_at = ?1, user_id = ?2
             WHERE token = ?3 AND is_used = 0 AND expires_at > ?1",
        )
        .bind(now)
        .bind(user_id)
        .bind(token)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            // Lost a race or expired in between; report the current state
            tx.rollback().await?;
            let record = self.get(token).await?;
            return match self.diagnose(&record, user_id).await? {
                Some(existing) => Ok(existing),
                None => Err(ChatError::AlreadyUsed("Chat token already used".to_string())),
            };
        }

        let (conversation, is_new_conversation) =
            ConversationStore::create_or_resume_in(&mut tx, user_id, &provider_id, None).await?;

        sqlx::query("UPDATE chat_tokens SET conversation_id = ?1 WHERE token = ?2")
            .bind(&conversation.id)
            .bind(token)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            user_id,
            conversation_id = %conversation.id,
            is_new_conversation,
            "Redeemed chat token"
        );

        Ok(Redemption {
            conversation,
            is_new_conversation,
        })
    }

    /// Check a token that has not been claimed by this call.
    ///
    /// `Ok(Some)` is an idempotent repeat by the original redeemer, `Ok(None)`
    /// means the token is still redeemable.
    async fn diagnose(&self, record: &ChatToken, user_id: &str) -> ChatResult<Option<Redemption>> {
        if record.expires_at <= Utc::now() {
            return Err(ChatError::Expired("Chat token expired".to_string()));
        }
        if record.is_used {
            if record.user_id.as_deref() == Some(user_id) {
                if let Some(conversation_id) = &record.conversation_id {
                    let conversation = ConversationStore::new(self.db.clone())
                        .get(conversation_id)
                        .await?;
                    return Ok(Some(Redemption {
                        conversation,
                        is_new_conversation: false,
                    }));
                }
            }
            return Err(ChatError::AlreadyUsed("Chat token already used".to_string()));
        }
        Ok(None)
    }

    async fn provider_for(&self, identifier: &str) -> ChatResult<String> {
        sqlx::query_scalar("SELECT provider_id FROM identifiers WHERE identifier = ?1")
            .bind(identifier)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("Unknown identifier {}", identifier)))
    }

    /// Delete tokens past their expiry, used or not
    pub async fn cleanup_expired(&self) -> ChatResult<u64> {
        let result = sqlx::query("DELETE FROM chat_tokens WHERE expires_at < ?1")
            .bind(Utc::now())
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{insert_user, test_pool};

    async fn setup() -> (ChatTokenManager, SqlitePool, tempfile::TempDir) {
        let (pool, dir) = test_pool().await;
        insert_user(&pool, "p1", "provider").await;
        insert_user(&pool, "u1", "customer").await;
        insert_user(&pool, "u2", "customer").await;
        sqlx::query("INSERT INTO identifiers (identifier, provider_id, created_at) VALUES ('abc123', 'p1', ?1)")
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();
        (ChatTokenManager::new(pool.clone(), 3600), pool, dir)
    }

    #[test]
    fn test_generate_token() {
        let token = ChatTokenManager::generate_token();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert_ne!(token, ChatTokenManager::generate_token());
    }

    #[tokio::test]
    async fn test_single_use_redemption() {
        let (manager, _pool, _dir) = setup().await;

        let token = manager.issue("abc123").await.unwrap();
        let redemption = manager.redeem(&token.token, "u1").await.unwrap();
        assert!(redemption.is_new_conversation);
        assert_eq!(redemption.conversation.customer_id, "u1");
        assert_eq!(redemption.conversation.provider_id, "p1");

        let stored = manager.get(&token.token).await.unwrap();
        assert!(stored.is_used);
        assert_eq!(stored.user_id.as_deref(), Some("u1"));
        assert_eq!(stored.conversation_id.as_deref(), Some(redemption.conversation.id.as_str()));

        let err = manager.redeem(&token.token, "u2").await.unwrap_err();
        assert!(matches!(err, ChatError::AlreadyUsed(_)));
    }

    #[tokio::test]
    async fn test_repeat_redemption_is_idempotent() {
        let (manager, _pool, _dir) = setup().await;

        let token = manager.issue("abc123").await.unwrap();
        let first = manager.redeem(&token.token, "u1").await.unwrap();
        let again = manager.redeem(&token.token, "u1").await.unwrap();
        assert_eq!(first.conversation.id, again.conversation.id);
        assert!(!again.is_new_conversation);

        // A second token for the same pair resumes the existing dialogue
        let second = manager.issue("abc123").await.unwrap();
        let resumed = manager.redeem(&second.token, "u1").await.unwrap();
        assert_eq!(resumed.conversation.id, first.conversation.id);
        assert!(!resumed.is_new_conversation);
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let (manager, pool, _dir) = setup().await;

        let token = manager.issue("abc123").await.unwrap();
        sqlx::query("UPDATE chat_tokens SET expires_at = ?1 WHERE token = ?2")
            .bind(Utc::now() - Duration::seconds(1))
            .bind(&token.token)
            .execute(&pool)
            .await
            .unwrap();

        let err = manager.redeem(&token.token, "u1").await.unwrap_err();
        assert!(matches!(err, ChatError::Expired(_)));
        assert!(!manager.get(&token.token).await.unwrap().is_used);

        assert_eq!(manager.cleanup_expired().await.unwrap(), 1);
        assert!(matches!(
            manager.redeem(&token.token, "u1").await.unwrap_err(),
            ChatError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_unknown_identifier_and_self_redeem() {
        let (manager, _pool, _dir) = setup().await;

        assert!(matches!(
            manager.issue("zzz999").await.unwrap_err(),
            ChatError::NotFound(_)
        ));

        let token = manager.issue("abc123").await.unwrap();
        assert!(matches!(
            manager.redeem(&token.token, "p1").await.unwrap_err(),
            ChatError::Forbidden(_)
        ));
        // The failed attempt leaves the token redeemable
        assert!(manager.redeem(&token.token, "u1").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_redemptions_have_one_winner() {
        let (manager, _pool, _dir) = setup().await;
        let token = manager.issue("abc123").await.unwrap();

        let a = {
            let manager = manager.clone();
            let token = token.token.clone();
            tokio::spawn(async move { manager.redeem(&token, "u1").await })
        };
        let b = {
            let manager = manager.clone();
            let token = token.token.clone();
            tokio::spawn(async move { manager.redeem(&token, "u2").await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ChatError::AlreadyUsed(_)))));
    }
}
