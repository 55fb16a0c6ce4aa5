/// Real-time gateway
///
/// Authenticates sockets, keeps each in at most one conversation room and
/// relays message, typing and read events. Rejected actions are logged and
/// produce no frame for the client.

pub mod events;
pub mod registry;
pub mod ws;

pub use events::{ClientEvent, ServerEvent};
pub use registry::{ConnectionRegistry, RegistryStats, SocketId};

use crate::{
    account::AccountManager,
    chat::{ConversationStore, MessageStore},
    db::models::{MessageType, MessageView},
    error::{ChatError, ChatResult},
    notifications::NotificationFanout,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// An authenticated, registered socket
pub struct Connection {
    pub socket_id: SocketId,
    pub user_id: String,
    pub events: mpsc::Receiver<ServerEvent>,
}

/// Gateway service
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    accounts: Arc<AccountManager>,
    conversations: ConversationStore,
    messages: MessageStore,
    fanout: NotificationFanout,
}

impl Gateway {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        accounts: Arc<AccountManager>,
        conversations: ConversationStore,
        messages: MessageStore,
        fanout: NotificationFanout,
    ) -> Self {
        Self {
            registry,
            accounts,
            conversations,
            messages,
            fanout,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Resolve a bearer credential to a user id
    pub async fn authenticate(&self, credential: &str) -> ChatResult<String> {
        let session = self.accounts.validate_access_token(credential).await?;
        Ok(session.user_id)
    }

    /// Register a socket for an already authenticated user
    pub async fn attach(&self, user_id: String) -> ChatResult<Connection> {
        let (socket_id, events) = self
            .registry
            .register(&user_id)
            .await
            .ok_or_else(|| ChatError::Unauthorized("Server is shutting down".to_string()))?;

        tracing::info!(%socket_id, user_id = %user_id, "Socket connected");

        Ok(Connection {
            socket_id,
            user_id,
            events,
        })
    }

    /// Authenticate a bearer credential and register a socket for its user
    pub async fn connect(&self, credential: &str) -> ChatResult<Connection> {
        let user_id = self.authenticate(credential).await?;
        self.attach(user_id).await
    }

    pub async fn disconnect(&self, socket_id: SocketId) {
        self.registry.unregister(socket_id).await;
    }

    /// Join a conversation room after checking participation
    pub async fn join(&self, socket_id: SocketId, user_id: &str, conversation_id: &str) -> ChatResult<()> {
        self.conversations
            .get_for_participant(conversation_id, user_id)
            .await?;
        let previous = self.registry.join(socket_id, conversation_id).await;
        tracing::debug!(%socket_id, conversation_id, previous = ?previous, "Joined conversation room");
        Ok(())
    }

    pub async fn leave(&self, socket_id: SocketId, conversation_id: &str) -> bool {
        self.registry.leave(socket_id, conversation_id).await
    }

    /// Persist a message, broadcast it to the room and notify the other
    /// participant.
    ///
    /// `socket` is the sending socket when the message came over the
    /// gateway; it receives the broadcast as its confirmation even when it
    /// has not joined the room.
    pub async fn send_message(
        &self,
        user_id: &str,
        socket: Option<SocketId>,
        conversation_id: &str,
        message_type: MessageType,
        body: &str,
        attachments: Vec<String>,
    ) -> ChatResult<MessageView> {
        let conversation = self
            .conversations
            .get_for_participant(conversation_id, user_id)
            .await?;
        let appended = self
            .messages
            .append(&conversation, user_id, message_type, body, attachments)
            .await?;
        let message = appended.message;

        let new_message = ServerEvent::NewMessage {
            conversation_id: conversation.id.clone(),
            message: message.clone(),
        };
        self.registry
            .emit_to_room(&conversation.id, &new_message, None)
            .await;
        if let Some(socket_id) = socket {
            if self.registry.room_of(socket_id).await.as_deref() != Some(conversation.id.as_str()) {
                self.registry.emit_to_socket(socket_id, &new_message).await;
            }
        }

        let updated = ServerEvent::ConversationUpdated {
            conversation_id: conversation.id.clone(),
            last_message_at: appended.last_message_at,
        };
        self.registry
            .emit_to_user(&conversation.customer_id, &updated)
            .await;
        self.registry
            .emit_to_user(&conversation.provider_id, &updated)
            .await;

        if let Err(e) = self.fanout.message_sent(&conversation, &message).await {
            tracing::warn!(conversation_id, "Notification fan-out failed: {}", e);
        }

        Ok(message)
    }

    /// Relay a typing indicator to the rest of the room
    pub async fn typing(
        &self,
        socket_id: SocketId,
        user_id: &str,
        conversation_id: &str,
        is_typing: bool,
    ) -> ChatResult<()> {
        if self.registry.room_of(socket_id).await.as_deref() != Some(conversation_id) {
            return Err(ChatError::Forbidden(
                "Socket has not joined this conversation".to_string(),
            ));
        }

        self.registry
            .emit_to_room(
                conversation_id,
                &ServerEvent::UserTyping {
                    conversation_id: conversation_id.to_string(),
                    user_id: user_id.to_string(),
                    is_typing,
                },
                Some(socket_id),
            )
            .await;
        Ok(())
    }

    /// Mark messages read and send a receipt to the other participant
    pub async fn mark_read(&self, user_id: &str, conversation_id: &str, message_id: &str) -> ChatResult<()> {
        let conversation = self
            .conversations
            .get_for_participant(conversation_id, user_id)
            .await?;

        if let Some(message) = self
            .messages
            .mark_read(&conversation, message_id, user_id)
            .await?
        {
            self.registry
                .emit_to_user(
                    conversation.other_participant(user_id),
                    &ServerEvent::MessageRead {
                        conversation_id: conversation.id.clone(),
                        message_id: message.id,
                        reader_id: user_id.to_string(),
                    },
                )
                .await;
        }
        Ok(())
    }

    /// Dispatch one client frame. Failures are logged; nothing is sent back.
    pub async fn handle_client_event(&self, socket_id: SocketId, user_id: &str, event: ClientEvent) {
        let result = match event {
            ClientEvent::JoinConversation { conversation_id } => {
                self.join(socket_id, user_id, &conversation_id).await
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                self.leave(socket_id, &conversation_id).await;
                Ok(())
            }
            ClientEvent::SendMessage {
                conversation_id,
                message_type,
                body,
                attachments,
            } => self
                .send_message(
                    user_id,
                    Some(socket_id),
                    &conversation_id,
                    message_type,
                    &body,
                    attachments,
                )
                .await
                .map(|_| ()),
            ClientEvent::Typing {
                conversation_id,
                is_typing,
            } => {
                self.typing(socket_id, user_id, &conversation_id, is_typing)
                    .await
            }
            ClientEvent::MarkRead {
                conversation_id,
                message_id,
            } => self.mark_read(user_id, &conversation_id, &message_id).await,
        };

        if let Err(e) = result {
            tracing::warn!(%socket_id, user_id, "Rejected socket action: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ServerConfig,
        db::{
            models::UserRole,
            testing::test_pool,
        },
        notifications::NotificationStore,
    };

    struct Harness {
        gateway: Gateway,
        notifications: NotificationStore,
        customer_token: String,
        provider_token: String,
        conversation_id: String,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let (pool, dir) = test_pool().await;
        let config = Arc::new(ServerConfig::for_directory(
            dir.path().to_path_buf(),
            "0123456789abcdef0123456789abcdef",
        ));
        let accounts = Arc::new(AccountManager::new(pool.clone(), config));
        let customer = accounts
            .register("Customer", "0888111111", "password123", UserRole::Customer)
            .await
            .unwrap();
        let provider = accounts
            .register("Provider", "0888222222", "password123", UserRole::Provider)
            .await
            .unwrap();
        let customer_token = accounts.create_session(&customer.id).await.unwrap().access_token;
        let provider_token = accounts.create_session(&provider.id).await.unwrap().access_token;

        let conversations = ConversationStore::new(pool.clone());
        let (conversation, _) = conversations
            .create_or_resume(&customer.id, &provider.id, None)
            .await
            .unwrap();

        let registry = Arc::new(ConnectionRegistry::default());
        let notifications = NotificationStore::new(pool.clone());
        let fanout = NotificationFanout::new(registry.clone(), notifications.clone());
        let gateway = Gateway::new(
            registry,
            accounts,
            conversations,
            MessageStore::new(pool, 1000, 200),
            fanout,
        );

        Harness {
            gateway,
            notifications,
            customer_token,
            provider_token,
            conversation_id: conversation.id,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_credential() {
        let h = harness().await;
        assert!(matches!(
            h.gateway.connect("garbage").await.err(),
            Some(ChatError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_provider_outside_room_gets_push_and_row() {
        let h = harness().await;
        let mut customer = h.gateway.connect(&h.customer_token).await.unwrap();
        let mut provider = h.gateway.connect(&h.provider_token).await.unwrap();

        h.gateway
            .handle_client_event(
                customer.socket_id,
                &customer.user_id,
                ClientEvent::JoinConversation {
                    conversation_id: h.conversation_id.clone(),
                },
            )
            .await;
        h.gateway
            .handle_client_event(
                customer.socket_id,
                &customer.user_id,
                ClientEvent::SendMessage {
                    conversation_id: h.conversation_id.clone(),
                    message_type: MessageType::Text,
                    body: "Тече ми кранът".to_string(),
                    attachments: vec![],
                },
            )
            .await;

        // Sender sees its own message as confirmation
        assert!(matches!(
            customer.events.recv().await,
            Some(ServerEvent::NewMessage { .. })
        ));

        let mut saw_notification = false;
        while let Ok(event) = provider.events.try_recv() {
            if let ServerEvent::NewMessageNotification { preview, .. } = event {
                assert_eq!(preview, "Тече ми кранът");
                saw_notification = true;
            }
        }
        assert!(saw_notification);

        let rows = h
            .notifications
            .list(&provider.user_id, true, 20, 0)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        h.notifications
            .mark_read(&rows[0].id, &provider.user_id)
            .await
            .unwrap();
        assert_eq!(h.notifications.unread_count(&provider.user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_room_members_get_live_events_without_rows() {
        let h = harness().await;
        let customer = h.gateway.connect(&h.customer_token).await.unwrap();
        let mut provider = h.gateway.connect(&h.provider_token).await.unwrap();

        for conn in [&customer, &provider] {
            h.gateway
                .join(conn.socket_id, &conn.user_id, &h.conversation_id)
                .await
                .unwrap();
        }

        h.gateway
            .typing(customer.socket_id, &customer.user_id, &h.conversation_id, true)
            .await
            .unwrap();
        let sent = h
            .gateway
            .send_message(
                &customer.user_id,
                Some(customer.socket_id),
                &h.conversation_id,
                MessageType::Text,
                "hi",
                vec![],
            )
            .await
            .unwrap();

        assert!(matches!(
            provider.events.recv().await,
            Some(ServerEvent::UserTyping { is_typing: true, .. })
        ));
        match provider.events.recv().await {
            Some(ServerEvent::NewMessage { message, .. }) => assert_eq!(message.id, sent.id),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(h.notifications.unread_count(&provider.user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_participant_cannot_join() {
        let h = harness().await;
        let customer = h.gateway.connect(&h.customer_token).await.unwrap();

        let err = h
            .gateway
            .join(customer.socket_id, &customer.user_id, "someone-elses")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
        assert_eq!(h.gateway.registry().room_of(customer.socket_id).await, None);

        // Typing outside a joined room is rejected
        assert!(h
            .gateway
            .typing(customer.socket_id, &customer.user_id, &h.conversation_id, true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_mark_read_sends_receipt() {
        let h = harness().await;
        let customer = h.gateway.connect(&h.customer_token).await.unwrap();
        let mut provider = h.gateway.connect(&h.provider_token).await.unwrap();

        let sent = h
            .gateway
            .send_message(&provider.user_id, None, &h.conversation_id, MessageType::Text, "Ще дойда в 10", vec![])
            .await
            .unwrap();
        while provider.events.try_recv().is_ok() {}

        h.gateway
            .mark_read(&customer.user_id, &h.conversation_id, &sent.id)
            .await
            .unwrap();

        match provider.events.try_recv() {
            Ok(ServerEvent::MessageRead { message_id, reader_id, .. }) => {
                assert_eq!(message_id, sent.id);
                assert_eq!(reader_id, customer.user_id);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
