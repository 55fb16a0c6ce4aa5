/// Notification fan-out
///
/// Decides, per recipient, between nothing (they are looking at the
/// conversation), a live push plus a stored row, or a stored row alone.
/// Pushes are best effort; the stored row is the durable copy.
use crate::{
    db::models::{Case, Conversation, MessageType, MessageView},
    error::ChatResult,
    gateway::{ConnectionRegistry, ServerEvent},
    notifications::NotificationStore,
};
use serde_json::json;
use std::sync::Arc;

const PREVIEW_CHARS: usize = 80;

/// How a notification reached its recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Recipient has the conversation open; the room broadcast is enough
    InRoom,
    /// Pushed to at least one socket and stored
    PushedAndStored,
    /// Recipient offline; stored only
    Stored,
}

/// Fan-out service
#[derive(Clone)]
pub struct NotificationFanout {
    registry: Arc<ConnectionRegistry>,
    store: NotificationStore,
}

impl NotificationFanout {
    pub fn new(registry: Arc<ConnectionRegistry>, store: NotificationStore) -> Self {
        Self { registry, store }
    }

    /// Notify the participant who did not send `message`
    pub async fn message_sent(
        &self,
        conversation: &Conversation,
        message: &MessageView,
    ) -> ChatResult<Delivery> {
        let recipient = conversation.other_participant(&message.sender_user_id);

        if self.registry.is_user_in_room(recipient, &conversation.id).await {
            return Ok(Delivery::InRoom);
        }

        let preview = preview_of(message);
        let pushed = self
            .registry
            .emit_to_user(
                recipient,
                &ServerEvent::NewMessageNotification {
                    conversation_id: conversation.id.clone(),
                    message_id: message.id.clone(),
                    sender_id: message.sender_user_id.clone(),
                    preview: preview.clone(),
                },
            )
            .await;

        self.store
            .create(
                recipient,
                "new_message",
                "New message",
                &preview,
                json!({
                    "conversationId": conversation.id,
                    "messageId": message.id,
                    "senderId": message.sender_user_id,
                }),
            )
            .await?;

        tracing::debug!(
            conversation_id = %conversation.id,
            recipient,
            pushed,
            "Message notification stored"
        );

        Ok(if pushed > 0 {
            Delivery::PushedAndStored
        } else {
            Delivery::Stored
        })
    }

    /// Tell the assigned provider about their new case
    pub async fn case_assigned(&self, case: &Case, conversation_id: &str) -> ChatResult<Delivery> {
        let Some(provider_id) = case.provider_id.as_deref() else {
            return Ok(Delivery::InRoom);
        };

        let pushed = self
            .registry
            .emit_to_user(
                provider_id,
                &ServerEvent::CaseAssigned {
                    case_id: case.id.clone(),
                    conversation_id: conversation_id.to_string(),
                    customer_id: case.customer_id.clone(),
                },
            )
            .await;

        self.store
            .create(
                provider_id,
                "case_assigned",
                "Case assigned",
                &case.title,
                json!({
                    "caseId": case.id,
                    "conversationId": conversation_id,
                    "customerId": case.customer_id,
                }),
            )
            .await?;

        tracing::info!(case_id = %case.id, provider_id, pushed, "Case assignment notified");

        Ok(if pushed > 0 {
            Delivery::PushedAndStored
        } else {
            Delivery::Stored
        })
    }
}

fn preview_of(message: &MessageView) -> String {
    match message.message_type {
        MessageType::Image => "[image]".to_string(),
        MessageType::File => "[file]".to_string(),
        MessageType::Text | MessageType::System => message
            .body
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(PREVIEW_CHARS)
            .collect(),
    }
}
