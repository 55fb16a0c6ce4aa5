/// Real-time event frames
///
/// Every WebSocket text frame is a JSON object `{ "event": <name>, "data": {...} }`.
use crate::db::models::{MessageType, MessageView};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client -> server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join-conversation", rename_all = "camelCase")]
    JoinConversation { conversation_id: String },

    #[serde(rename = "leave-conversation", rename_all = "camelCase")]
    LeaveConversation { conversation_id: String },

    #[serde(rename = "message:send", rename_all = "camelCase")]
    SendMessage {
        conversation_id: String,
        #[serde(rename = "type", default)]
        message_type: MessageType,
        #[serde(default)]
        body: String,
        #[serde(default)]
        attachments: Vec<String>,
    },

    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        conversation_id: String,
        is_typing: bool,
    },

    #[serde(rename = "mark_read", rename_all = "camelCase")]
    MarkRead {
        conversation_id: String,
        message_id: String,
    },
}

/// Server -> client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "message:new", rename_all = "camelCase")]
    NewMessage {
        conversation_id: String,
        message: MessageView,
    },

    #[serde(rename = "conversation:updated", rename_all = "camelCase")]
    ConversationUpdated {
        conversation_id: String,
        last_message_at: DateTime<Utc>,
    },

    #[serde(rename = "new_message_notification", rename_all = "camelCase")]
    NewMessageNotification {
        conversation_id: String,
        message_id: String,
        sender_id: String,
        preview: String,
    },

    #[serde(rename = "case_assigned", rename_all = "camelCase")]
    CaseAssigned {
        case_id: String,
        conversation_id: String,
        customer_id: String,
    },

    #[serde(rename = "user_typing", rename_all = "camelCase")]
    UserTyping {
        conversation_id: String,
        user_id: String,
        is_typing: bool,
    },

    #[serde(rename = "message_read", rename_all = "camelCase")]
    MessageRead {
        conversation_id: String,
        message_id: String,
        reader_id: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage { .. } => "message:new",
            ServerEvent::ConversationUpdated { .. } => "conversation:updated",
            ServerEvent::NewMessageNotification { .. } => "new_message_notification",
            ServerEvent::CaseAssigned { .. } => "case_assigned",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::MessageRead { .. } => "message_read",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_client_frames() {
        let join: ClientEvent = serde_json::from_value(json!({
            "event": "join-conversation",
            "data": { "conversationId": "c1" }
        }))
        .unwrap();
        assert_eq!(
            join,
            ClientEvent::JoinConversation {
                conversation_id: "c1".to_string()
            }
        );

        let send: ClientEvent = serde_json::from_value(json!({
            "event": "message:send",
            "data": { "conversationId": "c1", "body": "Кога можете да дойдете?" }
        }))
        .unwrap();
        match send {
            ClientEvent::SendMessage {
                message_type,
                attachments,
                ..
            } => {
                assert_eq!(message_type, MessageType::Text);
                assert!(attachments.is_empty());
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert!(serde_json::from_value::<ClientEvent>(json!({
            "event": "leave",
            "data": {}
        }))
        .is_err());
    }

    #[test]
    fn test_server_frame_shape() {
        let event = ServerEvent::UserTyping {
            conversation_id: "c1".to_string(),
            user_id: "u1".to_string(),
            is_typing: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "user_typing");
        assert_eq!(value["data"]["conversationId"], "c1");
        assert_eq!(value["data"]["isTyping"], true);
        assert_eq!(event.name(), "user_typing");
    }
}
