/// Durable notification rows, read by client polling
use crate::{
    db::models::Notification,
    error::{ChatError, ChatResult},
};
use chrono::Utc;
use sqlx::{types::Json, SqlitePool};
use uuid::Uuid;

const MAX_PAGE_SIZE: i64 = 100;

/// Notification store
#[derive(Clone)]
pub struct NotificationStore {
    db: SqlitePool,
}

impl NotificationStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Persist a notification for `user_id`
    pub async fn create(
        &self,
        user_id: &str,
        kind: &str,
        title: &str,
        message: &str,
        data: serde_json::Value,
    ) -> ChatResult<Notification> {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            data: Json(data),
            is_read: false,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO notifications (id, user_id, type, title, message, data, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        )
        .bind(&notification.id)
        .bind(&notification.user_id)
        .bind(&notification.kind)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.data)
        .bind(notification.created_at)
        .execute(&self.db)
        .await?;

        Ok(notification)
    }

    /// Newest first
    pub async fn list(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> ChatResult<Vec<Notification>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = offset.max(0);

        Ok(sqlx::query_as(
            "SELECT id, user_id, type, title, message, data, is_read, created_at
             FROM notifications
             WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0)
             ORDER BY created_at DESC
             LIMIT ?3 OFFSET ?4",
        )
        .bind(user_id)
        .bind(unread_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?)
    }

    pub async fn unread_count(&self, user_id: &str) -> ChatResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    /// Mark one of the user's notifications read
    pub async fn mark_read(&self, notification_id: &str, user_id: &str) -> ChatResult<Notification> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2")
            .bind(notification_id)
            .bind(user_id)
            .execute(&self.db)
            .await?;

        // Someone else's notification looks the same as a missing one
        if result.rows_affected() == 0 {
            return Err(ChatError::NotFound("Notification not found".to_string()));
        }

        Ok(sqlx::query_as(
            "SELECT id, user_id, type, title, message, data, is_read, created_at
             FROM notifications WHERE id = ?1",
        )
        .bind(notification_id)
        .fetch_one(&self.db)
        .await?)
    }

    pub async fn mark_all_read(&self, user_id: &str) -> ChatResult<u64> {
        let result =
            sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0")
                .bind(user_id)
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{insert_user, test_pool};
    use serde_json::json;

    #[tokio::test]
    async fn test_list_and_mark_read() {
        let (pool, _dir) = test_pool().await;
        insert_user(&pool, "u1", "provider").await;
        insert_user(&pool, "u2", "customer").await;
        let store = NotificationStore::new(pool);

        let first = store
            .create("u1", "new_message", "New message", "hello", json!({"conversationId": "c1"}))
            .await
            .unwrap();
        store
            .create("u1", "case_assigned", "Case assigned", "Leaking tap", json!({}))
            .await
            .unwrap();

        assert_eq!(store.unread_count("u1").await.unwrap(), 2);
        assert_eq!(store.list("u1", false, 20, 0).await.unwrap().len(), 2);

        // Not the owner
        assert!(matches!(
            store.mark_read(&first.id, "u2").await.unwrap_err(),
            ChatError::NotFound(_)
        ));

        let read = store.mark_read(&first.id, "u1").await.unwrap();
        assert!(read.is_read);
        assert_eq!(read.data.0["conversationId"], "c1");

        let unread = store.list("u1", true, 20, 0).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, "case_assigned");

        assert_eq!(store.mark_all_read("u1").await.unwrap(), 1);
        assert_eq!(store.unread_count("u1").await.unwrap(), 0);
    }
}
