use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::cache_service::{CacheAble, CacheService};
use crate::common::model::ResultSnapshot;
use crate::errors::Result;

impl CacheAble for ResultSnapshot {
    fn field() -> impl AsRef<str> {
        "topic"
    }
}

/// Popular topic ranking last published by the sync loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularTopics {
    pub topics: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl CacheAble for PopularTopics {
    fn field() -> impl AsRef<str> {
        "popular_topics"
    }
}

const POPULAR_TOPICS_ID: &str = "latest";

/// Low-latency lookup of the latest known result per (topic, language).
#[derive(Clone)]
pub struct HotCache {
    cache: CacheService,
    ttl: Duration,
}

impl HotCache {
    pub fn new(cache: CacheService, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Process-local cache, used when no redis is configured and in tests.
    pub fn local(namespace: impl Into<String>, ttl: Duration) -> Self {
        Self::new(CacheService::new(None, namespace.into(), Some(ttl), None), ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entry_id(topic: &str, language: &str) -> String {
        format!("{language}:{topic}")
    }

    pub fn key(&self, topic: &str, language: &str) -> String {
        ResultSnapshot::cache_id(&Self::entry_id(topic, language), &self.cache)
    }

    pub async fn get(&self, topic: &str, language: &str) -> Result<Option<ResultSnapshot>> {
        Ok(ResultSnapshot::sync(&Self::entry_id(topic, language), &self.cache).await?)
    }

    /// Overwrites the entry for the snapshot's (topic, language).
    pub async fn put(&self, snapshot: &ResultSnapshot) -> Result<()> {
        let id = Self::entry_id(&snapshot.topic, &snapshot.language);
        snapshot.send_with_ttl(&id, &self.cache, self.ttl).await?;
        Ok(())
    }

    pub async fn invalidate(&self, topic: &str, language: &str) -> Result<()> {
        ResultSnapshot::delete(&Self::entry_id(topic, language), &self.cache).await?;
        Ok(())
    }

    pub async fn put_popular_topics(&self, topics: &[String]) -> Result<()> {
        let popular = PopularTopics {
            topics: topics.to_vec(),
            generated_at: Utc::now(),
        };
        popular.send_with_ttl(POPULAR_TOPICS_ID, &self.cache, self.ttl).await?;
        Ok(())
    }

    pub async fn popular_topics(&self) -> Result<Vec<String>> {
        Ok(PopularTopics::sync(POPULAR_TOPICS_ID, &self.cache)
            .await?
            .map(|p| p.topics)
            .unwrap_or_default())
    }

    pub async fn ping(&self) -> Result<()> {
        Ok(self.cache.ping().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn snapshot(topic: &str, language: &str, text: &str) -> ResultSnapshot {
        ResultSnapshot {
            result_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            topic: topic.into(),
            source: "wikipedia".into(),
            language: language.into(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_put_get_keyed_by_topic_and_language() {
        let cache = HotCache::local("hot", Duration::from_secs(60));
        cache.put(&snapshot("quantum", "en", "Q")).await.unwrap();

        let hit = cache.get("quantum", "en").await.unwrap().unwrap();
        assert_eq!(hit.text, "Q");
        assert!(cache.get("quantum", "vi").await.unwrap().is_none());
        assert_eq!(cache.key("quantum", "en"), "hot:topic:en:quantum");
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let cache = HotCache::local("hot", Duration::from_secs(60));
        cache.put(&snapshot("A", "en", "old")).await.unwrap();
        cache.put(&snapshot("A", "en", "new")).await.unwrap();
        assert_eq!(cache.get("A", "en").await.unwrap().unwrap().text, "new");
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = HotCache::local("hot", Duration::from_millis(20));
        cache.put(&snapshot("A", "en", "x")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("A", "en").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_popular_topics_list() {
        let cache = HotCache::local("hot", Duration::from_secs(60));
        assert!(cache.popular_topics().await.unwrap().is_empty());

        cache
            .put_popular_topics(&["A".to_string(), "B".to_string()])
            .await
            .unwrap();
        assert_eq!(cache.popular_topics().await.unwrap(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = HotCache::local("hot", Duration::from_secs(60));
        cache.put(&snapshot("A", "en", "x")).await.unwrap();
        cache.invalidate("A", "en").await.unwrap();
        assert!(cache.get("A", "en").await.unwrap().is_none());
    }
}
