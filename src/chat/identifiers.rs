/// Identifier registry: public short identifiers used in shareable chat links
use crate::{
    db::models::{Identifier, UserRole},
    error::{ChatError, ChatResult},
};
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use sqlx::SqlitePool;

const IDENTIFIER_LENGTH: usize = 8;
const MAX_GENERATION_ATTEMPTS: usize = 5;

/// Identifier registry
#[derive(Clone)]
pub struct IdentifierRegistry {
    db: SqlitePool,
}

impl IdentifierRegistry {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Generate a new identifier candidate
    pub fn generate_identifier() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(IDENTIFIER_LENGTH)
            .map(char::from)
            .collect::<String>()
            .to_lowercase()
    }

    /// Return the provider's identifier, creating it on first call.
    /// Identifiers are immutable once created.
    pub async fn register(&self, provider_id: &str) -> ChatResult<Identifier> {
        let role: Option<UserRole> = sqlx::query_scalar("SELECT role FROM users WHERE id = ?1")
            .bind(provider_id)
            .fetch_optional(&self.db)
            .await?;
        match role {
            None => return Err(ChatError::NotFound("Provider not found".to_string())),
            Some(UserRole::Customer) => {
                return Err(ChatError::Forbidden(
                    "Only providers can own a chat identifier".to_string(),
                ))
            }
            Some(UserRole::Provider) => {}
        }

        if let Some(existing) = self.get_for_provider(provider_id).await? {
            return Ok(existing);
        }

        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let identifier = Identifier {
                identifier: Self::generate_identifier(),
                provider_id: provider_id.to_string(),
                created_at: Utc::now(),
            };

            let result = sqlx::query(
                "INSERT INTO identifiers (identifier, provider_id, created_at) VALUES (?1, ?2, ?3)",
            )
            .bind(&identifier.identifier)
            .bind(&identifier.provider_id)
            .bind(identifier.created_at)
            .execute(&self.db)
            .await;

            match result {
                Ok(_) => {
                    tracing::info!(provider_id, identifier = %identifier.identifier, "Registered provider identifier");
                    return Ok(identifier);
                }
                Err(e) if ChatError::is_unique_violation(&e) => {
                    // Either the code collided or a concurrent call registered this provider
                    if let Some(existing) = self.get_for_provider(provider_id).await? {
                        return Ok(existing);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ChatError::Internal(
            "Could not generate a unique identifier".to_string(),
        ))
    }

    /// Resolve a public identifier to its record
    pub async fn resolve(&self, identifier: &str) -> ChatResult<Identifier> {
        sqlx::query_as("SELECT identifier, provider_id, created_at FROM identifiers WHERE identifier = ?1")
            .bind(identifier)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("Unknown identifier {}", identifier)))
    }

    pub async fn get_for_provider(&self, provider_id: &str) -> ChatResult<Option<Identifier>> {
        Ok(sqlx::query_as(
            "SELECT identifier, provider_id, created_at FROM identifiers WHERE provider_id = ?1",
        )
        .bind(provider_id)
        .fetch_optional(&self.db)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{insert_user, test_pool};

    #[test]
    fn test_generate_identifier() {
        let id = IdentifierRegistry::generate_identifier();
        assert_eq!(id.len(), IDENTIFIER_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() && !c.is_uppercase()));
    }

    #[tokio::test]
    async fn test_register_is_stable_per_provider() {
        let (pool, _dir) = test_pool().await;
        insert_user(&pool, "provider-1", "provider").await;
        let registry = IdentifierRegistry::new(pool);

        let first = registry.register("provider-1").await.unwrap();
        let second = registry.register("provider-1").await.unwrap();
        assert_eq!(first.identifier, second.identifier);

        let resolved = registry.resolve(&first.identifier).await.unwrap();
        assert_eq!(resolved.provider_id, "provider-1");
    }

    #[tokio::test]
    async fn test_customers_cannot_register() {
        let (pool, _dir) = test_pool().await;
        insert_user(&pool, "customer-1", "customer").await;
        let registry = IdentifierRegistry::new(pool);

        let err = registry.register("customer-1").await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        assert!(matches!(
            registry.resolve("nope").await.unwrap_err(),
            ChatError::NotFound(_)
        ));
    }
}
