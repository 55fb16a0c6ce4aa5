/// Message store: ordered messages with read/edit/delete flags
///
/// Messages are append-only apart from `is_read`, `edited_at`, `deleted_at`
/// and the body on edit. Deleted bodies stay in the table but are never
/// rendered. Display order is `(sent_at, seq)` ascending.
use crate::{
    db::models::{Conversation, Message, MessageType, MessageView, SenderType},
    error::{ChatError, ChatResult},
};
use chrono::{DateTime, Utc};
use sqlx::{types::Json, SqliteConnection, SqlitePool};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "seq, id, conversation_id, sender_user_id, sender_type, message_type, body, \
     attachments, sent_at, is_read, edited_at, deleted_at";
const PREVIEW_CHARS: usize = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Message store
#[derive(Clone)]
pub struct MessageStore {
    db: SqlitePool,
    max_length: usize,
    max_page_size: i64,
}

/// Outcome of appending a message
#[derive(Debug, Clone)]
pub struct AppendedMessage {
    pub message: MessageView,
    pub last_message_at: DateTime<Utc>,
}

impl MessageStore {
    pub fn new(db: SqlitePool, max_length: usize, max_page_size: i64) -> Self {
        Self {
            db,
            max_length,
            max_page_size,
        }
    }

    fn validate_body(&self, body: &str, attachments: &[String]) -> ChatResult<()> {
        if body.trim().is_empty() && attachments.is_empty() {
            return Err(ChatError::Validation("Message body cannot be empty".to_string()));
        }
        if body.chars().count() > self.max_length {
            return Err(ChatError::Validation(format!(
                "Message exceeds {} characters",
                self.max_length
            )));
        }
        Ok(())
    }

    /// Persist a message from one of the conversation's participants.
    ///
    /// The conversation summary and the recipient's unread counter are
    /// updated in the same transaction as the insert.
    pub async fn append(
        &self,
        conversation: &Conversation,
        sender_user_id: &str,
        message_type: MessageType,
        body: &str,
        attachments: Vec<String>,
    ) -> ChatResult<AppendedMessage> {
        let sender_type = if sender_user_id == conversation.customer_id {
            SenderType::Customer
        } else if sender_user_id == conversation.provider_id {
            SenderType::Provider
        } else {
            return Err(ChatError::Forbidden(
                "Not a participant of this conversation".to_string(),
            ));
        };
        self.validate_body(body, &attachments)?;

        let mut tx = self.db.begin().await?;
        let appended = Self::append_in(
            &mut tx,
            &conversation.id,
            sender_user_id,
            sender_type,
            message_type,
            body,
            attachments,
        )
        .await?;
        tx.commit().await?;

        Ok(appended)
    }

    /// Insert a system message (e.g. case assignment) on the caller's connection
    pub async fn append_system_in(
        conn: &mut SqliteConnection,
        conversation_id: &str,
        body: &str,
    ) -> ChatResult<AppendedMessage> {
        Self::append_in(
            conn,
            conversation_id,
            "system",
            SenderType::System,
            MessageType::System,
            body,
            Vec::new(),
        )
        .await
    }

    async fn append_in(
        conn: &mut SqliteConnection,
        conversation_id: &str,
        sender_user_id: &str,
        sender_type: SenderType,
        message_type: MessageType,
        body: &str,
        attachments: Vec<String>,
    ) -> ChatResult<AppendedMessage> {
        let now = Utc::now();
        let preview = preview_of(message_type, body);

        // Summary update goes first so the write lock is held before any read
        let updated = sqlx::query(
            "UPDATE conversations
             SET last_message = ?1,
                 last_message_at = ?2,
                 customer_unread = customer_unread + (CASE WHEN ?3 = 'provider' THEN 1 ELSE 0 END),
                 provider_unread = provider_unread + (CASE WHEN ?3 = 'customer' THEN 1 ELSE 0 END)
             WHERE id = ?4 AND status = 'active'",
        )
        .bind(&preview)
        .bind(now)
        .bind(sender_type)
        .bind(conversation_id)
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM conversations WHERE id = ?1")
                    .bind(conversation_id)
                    .fetch_optional(&mut *conn)
                    .await?;
            return Err(match exists {
                Some(_) => ChatError::Validation("Conversation is closed".to_string()),
                None => ChatError::NotFound("Conversation not found".to_string()),
            });
        }

        let id = Uuid::new_v4().to_string();
        let seq: i64 = sqlx::query_scalar(
            "INSERT INTO messages (id, conversation_id, sender_user_id, sender_type, message_type, body, attachments, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             RETURNING seq",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(sender_user_id)
        .bind(sender_type)
        .bind(message_type)
        .bind(body)
        .bind(Json(&attachments))
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        tracing::debug!(conversation_id, message_id = %id, seq, "Stored message");

        Ok(AppendedMessage {
            message: MessageView {
                id,
                seq,
                conversation_id: conversation_id.to_string(),
                sender_user_id: sender_user_id.to_string(),
                sender_type,
                message_type,
                body: Some(body.to_string()),
                attachments,
                sent_at: now,
                is_read: false,
                edited_at: None,
                deleted_at: None,
            },
            last_message_at: now,
        })
    }

    /// Get a stored message
    pub async fn get(&self, message_id: &str) -> ChatResult<Message> {
        sqlx::query_as(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"))
            .bind(message_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ChatError::NotFound("Message not found".to_string()))
    }

    /// One page of history, oldest first.
    ///
    /// `before` is a message id; the page holds the newest `limit` messages
    /// that sort before it.
    pub async fn list(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: Option<i64>,
    ) -> ChatResult<Vec<MessageView>> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, self.max_page_size);

        let mut rows: Vec<Message> = match before {
            Some(cursor_id) => {
                let cursor = self.get(cursor_id).await?;
                if cursor.conversation_id != conversation_id {
                    return Err(ChatError::Validation(
                        "Cursor belongs to another conversation".to_string(),
                    ));
                }
                sqlx::query_as(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1 AND (sent_at < ?2 OR (sent_at = ?2 AND seq < ?3))
                     ORDER BY sent_at DESC, seq DESC
                     LIMIT ?4"
                ))
                .bind(conversation_id)
                .bind(cursor.sent_at)
                .bind(cursor.seq)
                .bind(limit)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY sent_at DESC, seq DESC
                     LIMIT ?2"
                ))
                .bind(conversation_id)
                .bind(limit)
                .fetch_all(&self.db)
                .await?
            }
        };

        rows.reverse();
        Ok(rows.into_iter().map(MessageView::from).collect())
    }

    /// Mark `message_id` and everything before it from the other party as read.
    ///
    /// Returns `None` when the reader is the sender (nothing to acknowledge).
    pub async fn mark_read(
        &self,
        conversation: &Conversation,
        message_id: &str,
        reader_id: &str,
    ) -> ChatResult<Option<Message>> {
        let message = self.get(message_id).await?;
        if message.conversation_id != conversation.id {
            return Err(ChatError::NotFound("Message not found".to_string()));
        }
        if message.sender_user_id == reader_id {
            return Ok(None);
        }

        let unread_column = if reader_id == conversation.customer_id {
            "customer_unread"
        } else {
            "provider_unread"
        };

        let mut tx = self.db.begin().await?;

        sqlx::query(
            "UPDATE messages SET is_read = 1
             WHERE conversation_id = ?1 AND sender_user_id != ?2 AND is_read = 0
               AND (sent_at < ?3 OR (sent_at = ?3 AND seq <= ?4))",
        )
        .bind(&conversation.id)
        .bind(reader_id)
        .bind(message.sent_at)
        .bind(message.seq)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "UPDATE conversations SET {unread_column} = (
                 SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND sender_user_id != ?2
                   AND sender_type != 'system' AND is_read = 0 AND deleted_at IS NULL
             )
             WHERE id = ?1"
        ))
        .bind(&conversation.id)
        .bind(reader_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(Message {
            is_read: true,
            ..message
        }))
    }

    /// Replace the body of a message; only its sender may edit
    pub async fn edit(&self, message_id: &str, editor_id: &str, body: &str) -> ChatResult<MessageView> {
        let message = self.get(message_id).await?;
        if message.sender_user_id != editor_id {
            return Err(ChatError::Forbidden("Only the sender can edit a message".to_string()));
        }
        if message.deleted_at.is_some() {
            return Err(ChatError::Validation("Cannot edit a deleted message".to_string()));
        }
        self.validate_body(body, &message.attachments.0)?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let updated = sqlx::query(
            "UPDATE messages SET body = ?1, edited_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
        )
        .bind(body)
        .bind(now)
        .bind(message_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(ChatError::Validation("Cannot edit a deleted message".to_string()));
        }
        Self::refresh_summary_in(&mut tx, &message.conversation_id).await?;
        tx.commit().await?;

        Ok(MessageView::from(Message {
            body: body.to_string(),
            edited_at: Some(now),
            ..message
        }))
    }

    /// Soft-delete a message; only its sender may delete. Idempotent.
    pub async fn delete(&self, message_id: &str, user_id: &str) -> ChatResult<MessageView> {
        let message = self.get(message_id).await?;
        if message.sender_user_id != user_id {
            return Err(ChatError::Forbidden("Only the sender can delete a message".to_string()));
        }
        if message.deleted_at.is_some() {
            return Ok(MessageView::from(message));
        }

        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let updated = sqlx::query("UPDATE messages SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL")
            .bind(now)
            .bind(message_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            // Lost a race with another delete of the same message
            tx.rollback().await?;
            return Ok(MessageView::from(self.get(message_id).await?));
        }
        Self::refresh_summary_in(&mut tx, &message.conversation_id).await?;
        tx.commit().await?;

        tracing::debug!(conversation_id = %message.conversation_id, message_id, "Deleted message");

        Ok(MessageView::from(Message {
            deleted_at: Some(now),
            ..message
        }))
    }

    /// Recompute the conversation preview and both unread counters from the
    /// messages that are still visible
    async fn refresh_summary_in(conn: &mut SqliteConnection, conversation_id: &str) -> ChatResult<()> {
        let latest: Option<(MessageType, String)> = sqlx::query_as(
            "SELECT message_type, body FROM messages
             WHERE conversation_id = ?1 AND deleted_at IS NULL
             ORDER BY sent_at DESC, seq DESC
             LIMIT 1",
        )
        .bind(conversation_id)
        .fetch_optional(&mut *conn)
        .await?;
        let preview = latest.map(|(message_type, body)| preview_of(message_type, &body));

        sqlx::query(
            "UPDATE conversations
             SET last_message = ?2,
                 customer_unread = (
                     SELECT COUNT(*) FROM messages
                     WHERE conversation_id = ?1 AND sender_type = 'provider'
                       AND is_read = 0 AND deleted_at IS NULL
                 ),
                 provider_unread = (
                     SELECT COUNT(*) FROM messages
                     WHERE conversation_id = ?1 AND sender_type = 'customer'
                       AND is_read = 0 AND deleted_at IS NULL
                 )
             WHERE id = ?1",
        )
        .bind(conversation_id)
        .bind(preview)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

/// Short text for conversation lists
fn preview_of(message_type: MessageType, body: &str) -> String {
    match message_type {
        MessageType::Image => "[image]".to_string(),
        MessageType::File => "[file]".to_string(),
        MessageType::Text | MessageType::System => {
            let trimmed = body.trim();
            if trimmed.chars().count() > PREVIEW_CHARS {
                let cut: String = trimmed.chars().take(PREVIEW_CHARS).collect();
                format!("{}…", cut)
            } else {
                trimmed.to_string()
            }
        }
    }
}
