use super::backend::CacheBackend;
use crate::errors::CacheError;
use deadpool_redis::Pool;
use deadpool_redis::redis::AsyncCommands;
use std::time::Duration;

pub struct RedisBackend {
    pool: Pool,
    compression_threshold: usize,
}

fn is_zstd(bytes: &[u8]) -> bool {
    bytes.len() > 4 && bytes[..4] == [0x28, 0xb5, 0x2f, 0xfd]
}

impl RedisBackend {
    pub fn new(pool: Pool, compression_threshold: usize) -> Self {
        Self {
            pool,
            compression_threshold,
        }
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool.get().await.map_err(|e| CacheError::Pool(e.to_string()))
    }
}

#[async_trait::async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn().await?;
        let result: Option<Vec<u8>> = conn.get(key).await?;

        match result {
            Some(bytes) if is_zstd(&bytes) => {
                let decoded = tokio::task::spawn_blocking(move || {
                    zstd::stream::decode_all(std::io::Cursor::new(bytes))
                })
                .await
                .map_err(|e| CacheError::Pool(e.to_string()))??;
                Ok(Some(decoded))
            }
            other => Ok(other),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let final_value = if value.len() > self.compression_threshold {
            let val = value.to_vec();
            tokio::task::spawn_blocking(move || zstd::stream::encode_all(std::io::Cursor::new(val), 3))
                .await
                .map_err(|e| CacheError::Pool(e.to_string()))??
        } else {
            value.to_vec()
        };

        let mut conn = self.conn().await?;
        match ttl {
            // SET EX rejects 0
            Some(duration) => {
                let _: () = conn.set_ex(key, final_value, duration.as_secs().max(1)).await?;
            }
            None => {
                let _: () = conn.set(key, final_value).await?;
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let _: String = deadpool_redis::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
