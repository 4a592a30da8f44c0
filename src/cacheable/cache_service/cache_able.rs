use super::service::CacheService;
use crate::errors::CacheError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Values stored under `<namespace>:<field>:<id>`.
#[async_trait::async_trait]
pub trait CacheAble: Send + Sync + Sized
where
    Self: Serialize + for<'de> Deserialize<'de> + 'static,
{
    fn field() -> impl AsRef<str>;

    async fn send(&self, id: &str, cache: &CacheService) -> Result<(), CacheError> {
        let key = Self::cache_id(id, cache);
        let content = serde_json::to_vec(self)?;
        cache.backend.set(&key, &content, cache.default_ttl).await
    }

    async fn send_with_ttl(&self, id: &str, cache: &CacheService, ttl: Duration) -> Result<(), CacheError> {
        let key = Self::cache_id(id, cache);
        let content = serde_json::to_vec(self)?;
        cache.backend.set(&key, &content, Some(ttl)).await
    }

    async fn sync(id: &str, cache: &CacheService) -> Result<Option<Self>, CacheError> {
        let key = Self::cache_id(id, cache);
        match cache.backend.get(&key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete(id: &str, cache: &CacheService) -> Result<(), CacheError> {
        let key = Self::cache_id(id, cache);
        cache.backend.del(&key).await
    }

    fn cache_id(id: &str, cache: &CacheService) -> String {
        format!("{}:{}:{id}", cache.namespace, Self::field().as_ref())
    }
}
