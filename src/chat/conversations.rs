/// Conversation store: customer/provider dialogues and their list-view summary
use crate::{
    db::models::{Conversation, ConversationStatus},
    error::{ChatError, ChatResult},
};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

const CONVERSATION_COLUMNS: &str = "id, customer_id, provider_id, case_id, last_message, last_message_at, \
     status, customer_unread, provider_unread, created_at";

/// Conversation store
#[derive(Clone)]
pub struct ConversationStore {
    db: SqlitePool,
}

impl ConversationStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Find the active conversation for this pair (and case), or create one.
    ///
    /// Runs on the caller's connection so it can join a larger transaction.
    /// Returns the conversation and whether it was newly created.
    pub async fn create_or_resume_in(
        conn: &mut SqliteConnection,
        customer_id: &str,
        provider_id: &str,
        case_id: Option<&str>,
    ) -> ChatResult<(Conversation, bool)> {
        if customer_id == provider_id {
            return Err(ChatError::Validation(
                "Cannot open a conversation with yourself".to_string(),
            ));
        }

        if let Some(conversation) =
            Self::find_active_in(conn, customer_id, provider_id, case_id).await?
        {
            return Ok((conversation, false));
        }

        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            customer_id: customer_id.to_string(),
            provider_id: provider_id.to_string(),
            case_id: case_id.map(str::to_string),
            last_message: None,
            last_message_at: None,
            status: ConversationStatus::Active,
            customer_unread: 0,
            provider_unread: 0,
            created_at: Utc::now(),
        };

        let inserted = sqlx::query(
            "INSERT INTO conversations (id, customer_id, provider_id, case_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&conversation.id)
        .bind(&conversation.customer_id)
        .bind(&conversation.provider_id)
        .bind(&conversation.case_id)
        .bind(conversation.status)
        .bind(conversation.created_at)
        .execute(&mut *conn)
        .await;

        if let Err(e) = inserted {
            if !ChatError::is_unique_violation(&e) {
                return Err(e.into());
            }
            // Another writer opened the same dialogue first
            return Self::find_active_in(conn, customer_id, provider_id, case_id)
                .await?
                .map(|existing| (existing, false))
                .ok_or_else(|| ChatError::Internal("Active conversation vanished".to_string()));
        }

        tracing::info!(
            conversation_id = %conversation.id,
            customer_id,
            provider_id,
            "Created conversation"
        );

        Ok((conversation, true))
    }

    async fn find_active_in(
        conn: &mut SqliteConnection,
        customer_id: &str,
        provider_id: &str,
        case_id: Option<&str>,
    ) -> ChatResult<Option<Conversation>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE customer_id = ?1 AND provider_id = ?2 AND case_id IS ?3 AND status = 'active'
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(customer_id)
        .bind(provider_id)
        .bind(case_id)
        .fetch_optional(&mut *conn)
        .await?)
    }

    /// Standalone variant of [`Self::create_or_resume_in`] for tests
    #[cfg(test)]
    pub(crate) async fn create_or_resume(
        &self,
        customer_id: &str,
        provider_id: &str,
        case_id: Option<&str>,
    ) -> ChatResult<(Conversation, bool)> {
        let mut tx = self.db.begin().await?;
        let result = Self::create_or_resume_in(&mut tx, customer_id, provider_id, case_id).await?;
        tx.commit().await?;
        Ok(result)
    }

    /// Get conversation by id
    pub async fn get(&self, conversation_id: &str) -> ChatResult<Conversation> {
        let mut conn = self.db.acquire().await?;
        Self::get_in(&mut conn, conversation_id).await
    }

    pub async fn get_in(conn: &mut SqliteConnection, conversation_id: &str) -> ChatResult<Conversation> {
        sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"
        ))
        .bind(conversation_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| ChatError::NotFound("Conversation not found".to_string()))
    }

    /// Get a conversation, failing with `Forbidden` for non-participants
    pub async fn get_for_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> ChatResult<Conversation> {
        let conversation = self.get(conversation_id).await?;
        if !conversation.is_participant(user_id) {
            return Err(ChatError::Forbidden(
                "Not a participant of this conversation".to_string(),
            ));
        }
        Ok(conversation)
    }

    /// List a user's conversations, most recently active first
    pub async fn list_for_user(&self, user_id: &str) -> ChatResult<Vec<Conversation>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE customer_id = ?1 OR provider_id = ?1
             ORDER BY COALESCE(last_message_at, created_at) DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?)
    }

    /// Close a conversation on behalf of one of its participants
    pub async fn close(&self, conversation_id: &str, user_id: &str) -> ChatResult<Conversation> {
        let mut conversation = self.get_for_participant(conversation_id, user_id).await?;

        sqlx::query("UPDATE conversations SET status = 'closed' WHERE id = ?1")
            .bind(conversation_id)
            .execute(&self.db)
            .await?;

        tracing::info!(conversation_id, closed_by = user_id, "Closed conversation");
        conversation.status = ConversationStatus::Closed;
        Ok(conversation)
    }

    /// Close every active conversation linked to a case
    pub async fn close_for_case_in(conn: &mut SqliteConnection, case_id: &str) -> ChatResult<u64> {
        let result = sqlx::query(
            "UPDATE conversations SET status = 'closed' WHERE case_id = ?1 AND status = 'active'",
        )
        .bind(case_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Total unread messages for a user across all conversations
    pub async fn unread_total(&self, user_id: &str) -> ChatResult<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(CASE WHEN customer_id = ?1 THEN customer_unread ELSE provider_unread END), 0)
             FROM conversations WHERE customer_id = ?1 OR provider_id = ?1",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{insert_user, test_pool};

    async fn setup() -> (ConversationStore, SqlitePool, tempfile::TempDir) {
        let (pool, dir) = test_pool().await;
        insert_user(&pool, "customer", "customer").await;
        insert_user(&pool, "provider", "provider").await;
        insert_user(&pool, "stranger", "customer").await;
        (ConversationStore::new(pool.clone()), pool, dir)
    }

    #[tokio::test]
    async fn test_create_then_resume() {
        let (store, _pool, _dir) = setup().await;

        let (first, created) = store.create_or_resume("customer", "provider", None).await.unwrap();
        assert!(created);
        let (second, created) = store.create_or_resume("customer", "provider", None).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        // A case-linked dialogue is separate from the direct one
        let (linked, created) = store
            .create_or_resume("customer", "provider", Some("case-1"))
            .await
            .unwrap();
        assert!(created);
        assert_ne!(linked.id, first.id);
    }

    #[tokio::test]
    async fn test_closed_conversation_is_not_resumed() {
        let (store, _pool, _dir) = setup().await;

        let (first, _) = store.create_or_resume("customer", "provider", None).await.unwrap();
        store.close(&first.id, "provider").await.unwrap();

        let (second, created) = store.create_or_resume("customer", "provider", None).await.unwrap();
        assert!(created);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_second_active_row_is_rejected_by_schema() {
        let (store, pool, _dir) = setup().await;

        let (first, _) = store.create_or_resume("customer", "provider", None).await.unwrap();

        let duplicate = sqlx::query(
            "INSERT INTO conversations (id, customer_id, provider_id, case_id, status, created_at)
             VALUES ('dup', 'customer', 'provider', NULL, 'active', ?1)",
        )
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap_err();
        assert!(ChatError::is_unique_violation(&duplicate));

        // Once closed, the pair may open a fresh dialogue
        store.close(&first.id, "customer").await.unwrap();
        let (second, created) = store.create_or_resume("customer", "provider", None).await.unwrap();
        assert!(created);
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn test_non_participant_is_forbidden() {
        let (store, _pool, _dir) = setup().await;

        let (conversation, _) = store.create_or_resume("customer", "provider", None).await.unwrap();
        let err = store
            .get_for_participant(&conversation.id, "stranger")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        assert!(store.close(&conversation.id, "stranger").await.is_err());
        assert_eq!(store.list_for_user("stranger").await.unwrap().len(), 0);
        assert_eq!(store.list_for_user("customer").await.unwrap().len(), 1);
    }
}
