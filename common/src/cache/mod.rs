use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::AppError;

/// TTL for inter-stage staging payloads.
pub const STAGING_TTL: Duration = Duration::from_secs(3 * 60 * 60);

/// Staging key for the scraped article body.
pub fn content_key(task_id: Uuid) -> String {
    format!("{task_id}.article.content")
}

/// Staging key for the structured keyword result.
pub fn keywords_key(task_id: Uuid) -> String {
    format!("{task_id}.article.keywords")
}

/// Short-TTL key/value staging between pipeline stages. Writes are
/// best-effort for the callers; the store remains the source of truth.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError>;
}

/// Redis-backed [`Cache`] over a multiplexed connection manager that
/// reconnects on its own.
#[derive(Clone)]
pub struct RedisCache {
    manager: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_keys_embed_the_task_id() {
        let task_id = Uuid::new_v4();
        assert_eq!(content_key(task_id), format!("{task_id}.article.content"));
        assert_eq!(keywords_key(task_id), format!("{task_id}.article.keywords"));
    }

    #[test]
    fn staging_ttl_is_three_hours() {
        assert_eq!(STAGING_TTL.as_secs(), 10_800);
    }
}
