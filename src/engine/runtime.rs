use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use super::cache_sync::CacheSyncLoop;
use super::resolver::{Resolver, ResolverConfig};
use super::service::CrawlService;
use super::worker::Worker;
use crate::cacheable::{CacheService, HotCache};
use crate::common::model::Config;
use crate::errors::{CacheError, Result};
use crate::extraction::{GeminiExtractor, TopicExtractor};
use crate::queue::{MemoryQueue, MqBackend, NackPolicy, RedisQueue, TaskQueue};
use crate::source::{SourceRegistry, WikipediaSource};
use crate::store::{DataStore, MemoryStore, PostgresStore};
use crate::utils::connector::create_redis_pool;

/// Process-wide collaborators, acquired once at start and shared by the
/// worker, the sync loop and the service.
#[derive(Clone)]
pub struct Runtime {
    pub config: Arc<Config>,
    pub store: Arc<dyn DataStore>,
    pub cache: HotCache,
    pub queue: TaskQueue,
    pub sources: SourceRegistry,
    pub extractor: Arc<dyn TopicExtractor>,
    redis_pools: Vec<deadpool_redis::Pool>,
}

impl Runtime {
    pub async fn connect(config: &Config) -> Result<Self> {
        let call_timeout = config.crawler.call_timeout();

        let store: Arc<dyn DataStore> = if config.db.url.is_some() {
            info!("Using postgres store");
            Arc::new(PostgresStore::connect(&config.db).await?)
        } else {
            warn!("No database configured, using in-memory store");
            Arc::new(MemoryStore::new())
        };

        let mut redis_pools = Vec::new();
        let cache_ttl = Duration::from_secs(config.cache.ttl.max(1));
        let cache_pool = match &config.cache.redis {
            Some(redis) => {
                let pool = create_redis_pool(redis)
                    .ok_or_else(|| CacheError::Pool("failed to create cache redis pool".into()))?;
                redis_pools.push(pool.clone());
                Some(pool)
            }
            None => {
                warn!("No cache redis configured, using process-local cache");
                None
            }
        };
        let cache = HotCache::new(
            CacheService::new(
                cache_pool,
                config.cache.namespace.clone(),
                Some(cache_ttl),
                config.cache.compression_threshold,
            ),
            cache_ttl,
        );

        let channel = &config.channel_config;
        let (backend, capacity): (Arc<dyn MqBackend>, usize) = if channel.redis.is_some() {
            let queue = RedisQueue::new(channel, &config.name)?;
            info!("Using redis stream queue for {}", channel.topic);
            // Entries stay in the stream until this worker is free.
            (Arc::new(queue), 1)
        } else {
            warn!("No queue redis configured, using in-memory queue");
            let queue = MemoryQueue::new(NackPolicy {
                max_retries: channel.max_retries,
                backoff_ms: channel.backoff_ms,
            });
            (Arc::new(queue), channel.capacity)
        };
        let queue = TaskQueue::new(backend, channel.topic.clone(), capacity);

        let sources = SourceRegistry::new();
        sources.register(Arc::new(WikipediaSource::new(
            config.crawler.wikipedia_endpoint.clone(),
            call_timeout,
        )?));

        let extractor: Arc<dyn TopicExtractor> = Arc::new(GeminiExtractor::new(&config.extraction, call_timeout)?);
        if config.extraction.api_key.is_none() {
            warn!("No extraction api key configured, raw input will be used as the topic");
        }

        Ok(Self {
            config: Arc::new(config.clone()),
            store,
            cache,
            queue,
            sources,
            extractor,
            redis_pools,
        })
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(
            self.store.clone(),
            self.cache.clone(),
            self.sources.clone(),
            ResolverConfig::from(&self.config.crawler),
        )
    }

    pub fn worker(&self) -> Worker {
        Worker::new(self.store.clone(), self.resolver())
    }

    pub fn cache_sync(&self) -> CacheSyncLoop {
        CacheSyncLoop::new(self.store.clone(), self.cache.clone(), &self.config.crawler)
    }

    pub fn service(&self) -> CrawlService {
        CrawlService::new(
            self.store.clone(),
            self.cache.clone(),
            self.queue.clone(),
            self.extractor.clone(),
            self.config.crawler.call_timeout(),
        )
    }

    /// Verifies store and cache are reachable.
    pub async fn health_check(&self) -> Result<()> {
        self.store.ping().await?;
        self.cache.ping().await?;
        Ok(())
    }

    pub async fn close(self) {
        let backend = self.queue.backend();
        if let Err(e) = backend.clean_storage().await {
            warn!("Queue cleanup on close failed: {}", e);
        }
        backend.close().await;
        for pool in &self.redis_pools {
            pool.close();
        }
        if let Err(e) = self.store.close().await {
            warn!("Closing the store failed: {}", e);
        }
        info!("Runtime closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{DeadLetter, Message};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    struct ClosingQueue {
        inner: MemoryQueue,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl MqBackend for ClosingQueue {
        async fn publish_with_headers(&self, topic: &str, payload: &[u8], headers: &HashMap<String, String>) -> Result<()> {
            self.inner.publish_with_headers(topic, payload, headers).await
        }
        async fn subscribe(&self, topic: &str, sender: mpsc::Sender<Message>) -> Result<()> {
            self.inner.subscribe(topic, sender).await
        }
        async fn send_to_dlq(&self, topic: &str, id: &str, payload: &[u8], reason: &str) -> Result<()> {
            self.inner.send_to_dlq(topic, id, payload, reason).await
        }
        async fn read_dlq(&self, topic: &str, count: usize) -> Result<Vec<DeadLetter>> {
            self.inner.read_dlq(topic, count).await
        }
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_close_releases_queue_backend() {
        let mut runtime = Runtime::connect(&Config::default()).await.unwrap();
        let closed = Arc::new(AtomicBool::new(false));
        runtime.queue = TaskQueue::new(
            Arc::new(ClosingQueue {
                inner: MemoryQueue::default(),
                closed: closed.clone(),
            }),
            "crawl_queue",
            1,
        );
        runtime.close().await;
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_connect_without_backends_is_single_node() {
        let runtime = Runtime::connect(&Config::default()).await.unwrap();
        runtime.health_check().await.unwrap();
        assert_eq!(runtime.sources.names(), vec!["wikipedia"]);
        assert_eq!(runtime.queue.topic(), "crawl_queue");
        runtime.close().await;
    }
}
