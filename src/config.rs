/// Configuration management for the MaystorFix backend
use crate::error::{ChatError, ChatResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub chat: ChatConfig,
    pub bidding: BiddingConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
    /// Allowed CORS origins; empty means any
    pub cors_origins: Vec<String>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
    pub max_connections: u32,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Access token lifetime in seconds
    pub session_ttl: i64,
}

/// Chat token and message configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Chat token lifetime in seconds
    pub token_ttl: i64,
    pub max_message_length: usize,
    pub message_page_limit: i64,
}

/// Case bidding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiddingConfig {
    pub max_bidders: i64,
}

/// Background job intervals in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub token_cleanup_interval: u64,
    pub session_cleanup_interval: u64,
    pub health_check_interval: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ChatResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("MAYSTOR_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("MAYSTOR_PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .map_err(|_| ChatError::Validation("Invalid port number".to_string()))?;
        let version = env::var("MAYSTOR_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());
        let cors_origins = env::var("MAYSTOR_CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let data_directory: PathBuf = env::var("MAYSTOR_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("MAYSTOR_DATABASE_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("maystorfix.sqlite"));
        let max_connections = env_or("MAYSTOR_DATABASE_MAX_CONNECTIONS", 10);

        let jwt_secret = env::var("MAYSTOR_JWT_SECRET")
            .map_err(|_| ChatError::Validation("JWT secret required".to_string()))?;
        let session_ttl = env_or("MAYSTOR_SESSION_TTL", 7 * 24 * 3600);

        let token_ttl = env_or("MAYSTOR_CHAT_TOKEN_TTL", 3600);
        let max_message_length = env_or("MAYSTOR_MAX_MESSAGE_LENGTH", 4000);
        let message_page_limit = env_or("MAYSTOR_MESSAGE_PAGE_LIMIT", 200);

        let max_bidders = env_or("MAYSTOR_MAX_BIDDERS", 3);

        let token_cleanup_interval = env_or("MAYSTOR_TOKEN_CLEANUP_INTERVAL", 900);
        let session_cleanup_interval = env_or("MAYSTOR_SESSION_CLEANUP_INTERVAL", 3600);
        let health_check_interval = env_or("MAYSTOR_HEALTH_CHECK_INTERVAL", 300);

        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let json = env_or("MAYSTOR_LOG_JSON", false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
                cors_origins,
            },
            storage: StorageConfig {
                data_directory,
                database,
                max_connections,
            },
            authentication: AuthConfig {
                jwt_secret,
                session_ttl,
            },
            chat: ChatConfig {
                token_ttl,
                max_message_length,
                message_page_limit,
            },
            bidding: BiddingConfig { max_bidders },
            jobs: JobsConfig {
                token_cleanup_interval,
                session_cleanup_interval,
                health_check_interval,
            },
            logging: LoggingConfig { level, json },
        })
    }

    /// Configuration for tests and local tooling, rooted at `data_directory`
    pub fn for_directory(data_directory: PathBuf, jwt_secret: &str) -> Self {
        ServerConfig {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 0,
                version: env!("CARGO_PKG_VERSION").to_string(),
                cors_origins: Vec::new(),
            },
            storage: StorageConfig {
                database: data_directory.join("maystorfix.sqlite"),
                data_directory,
                max_connections: 8,
            },
            authentication: AuthConfig {
                jwt_secret: jwt_secret.to_string(),
                session_ttl: 3600,
            },
            chat: ChatConfig {
                token_ttl: 3600,
                max_message_length: 4000,
                message_page_limit: 200,
            },
            bidding: BiddingConfig { max_bidders: 3 },
            jobs: JobsConfig {
                token_cleanup_interval: 900,
                session_cleanup_interval: 3600,
                health_check_interval: 300,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> ChatResult<()> {
        if self.service.hostname.is_empty() {
            return Err(ChatError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(ChatError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.chat.token_ttl <= 0 || self.authentication.session_ttl <= 0 {
            return Err(ChatError::Validation("Token lifetimes must be positive".to_string()));
        }

        if self.bidding.max_bidders < 1 {
            return Err(ChatError::Validation("Bidder cap must be at least 1".to_string()));
        }

        if self.chat.message_page_limit < 1 {
            return Err(ChatError::Validation("Message page limit must be at least 1".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_short_secret() {
        let config = ServerConfig::for_directory("./data".into(), "short");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_bidder_cap() {
        let mut config =
            ServerConfig::for_directory("./data".into(), "0123456789abcdef0123456789abcdef");
        assert!(config.validate().is_ok());
        config.bidding.max_bidders = 0;
        assert!(config.validate().is_err());
    }
}
