/// Application context and dependency injection
use crate::{
    account::AccountManager,
    cases::CaseManager,
    chat::{ChatTokenManager, ConversationStore, IdentifierRegistry, MessageStore},
    config::ServerConfig,
    db,
    error::{ChatError, ChatResult},
    gateway::{ConnectionRegistry, Gateway},
    notifications::{NotificationFanout, NotificationStore},
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub account_manager: Arc<AccountManager>,
    // Chat storage
    pub identifiers: IdentifierRegistry,
    pub chat_tokens: ChatTokenManager,
    pub conversations: ConversationStore,
    pub messages: MessageStore,
    pub notifications: NotificationStore,
    // Live connections; drained on shutdown
    pub registry: Arc<ConnectionRegistry>,
    pub gateway: Gateway,
    pub cases: CaseManager,
    pub started_at: Instant,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> ChatResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let db = db::create_pool(
            &config.storage.database,
            db::DatabaseOptions {
                max_connections: config.storage.max_connections,
                ..Default::default()
            },
        )
        .await?;

        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let config = Arc::new(config);
        let account_manager = Arc::new(AccountManager::new(db.clone(), config.clone()));

        let identifiers = IdentifierRegistry::new(db.clone());
        let chat_tokens = ChatTokenManager::new(db.clone(), config.chat.token_ttl);
        let conversations = ConversationStore::new(db.clone());
        let messages = MessageStore::new(
            db.clone(),
            config.chat.max_message_length,
            config.chat.message_page_limit,
        );
        let notifications = NotificationStore::new(db.clone());

        let registry = Arc::new(ConnectionRegistry::default());
        let fanout = NotificationFanout::new(registry.clone(), notifications.clone());
        let gateway = Gateway::new(
            registry.clone(),
            account_manager.clone(),
            conversations.clone(),
            messages.clone(),
            fanout.clone(),
        );
        let cases = CaseManager::new(
            db.clone(),
            config.bidding.max_bidders,
            registry.clone(),
            fanout,
        );

        tracing::info!(database = %config.storage.database.display(), "Application context ready");

        Ok(Self {
            config,
            db,
            account_manager,
            identifiers,
            chat_tokens,
            conversations,
            messages,
            notifications,
            registry,
            gateway,
            cases,
            started_at: Instant::now(),
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> ChatResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                ChatError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }
        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
