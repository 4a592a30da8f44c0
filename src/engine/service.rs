use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cacheable::HotCache;
use crate::common::model::{CrawlRequest, JobCreated, JobMessage, JobStatus, ResultView, Task};
use crate::errors::{Error, OrmError, Result};
use crate::extraction::{TopicExtractor, extract_topics_or_fallback};
use crate::queue::TaskQueue;
use crate::store::DataStore;

/// Submission, status and result reads for crawl jobs.
#[derive(Clone)]
pub struct CrawlService {
    store: Arc<dyn DataStore>,
    cache: HotCache,
    queue: TaskQueue,
    extractor: Arc<dyn TopicExtractor>,
    call_timeout: Duration,
}

impl CrawlService {
    pub fn new(
        store: Arc<dyn DataStore>,
        cache: HotCache,
        queue: TaskQueue,
        extractor: Arc<dyn TopicExtractor>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            queue,
            extractor,
            call_timeout,
        }
    }

    fn validate(request: &CrawlRequest) -> Result<()> {
        if request.topic.trim().is_empty() {
            return Err(Error::invalid_task("topic must not be empty"));
        }
        if request.sources.is_empty() || request.sources.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::invalid_task("at least one source is required"));
        }
        if request.language.trim().is_empty() {
            return Err(Error::invalid_task("language must not be empty"));
        }
        Ok(())
    }

    /// Extracts topics, persists a PENDING task and enqueues its job.
    pub async fn create_job(&self, request: CrawlRequest) -> Result<JobCreated> {
        Self::validate(&request)?;

        let topics =
            extract_topics_or_fallback(self.extractor.as_ref(), &request.topic, &request.language, self.call_timeout)
                .await;
        let task = Task::new(
            request.topic,
            topics,
            request.sources,
            request.language,
            request.metadata,
        );
        tokio::time::timeout(self.call_timeout, self.store.create_task(&task)).await??;

        let job = JobMessage::from(&task);
        if let Err(e) = tokio::time::timeout(self.call_timeout, self.queue.publish(&job))
            .await
            .map_err(Error::from)
            .and_then(|r| r)
        {
            error!("Failed to enqueue task {}: {}", task.id, e);
            return Err(e);
        }

        info!("Created new crawl task {}", task.id);
        Ok(JobCreated {
            task_id: task.id,
            extracted_topics: task.topics,
        })
    }

    pub async fn get_status(&self, task_id: Uuid) -> Result<JobStatus> {
        let task = tokio::time::timeout(self.call_timeout, self.store.get_task(task_id))
            .await??
            .ok_or_else(|| Error::task_not_found(task_id))?;
        Ok(JobStatus {
            task_id: task.id,
            status: task.status,
            result_ids: task.result_ids,
            error: task.error,
        })
    }

    pub async fn get_result(&self, result_id: Uuid) -> Result<ResultView> {
        let result = tokio::time::timeout(self.call_timeout, self.store.get_result(result_id))
            .await??
            .ok_or(OrmError::NotFound)?;
        Ok(ResultView {
            result_id: result.id,
            topic: result.topic,
            source: result.source,
            language: result.language,
            text: result.text,
        })
    }

    /// The ranking last published by the cache sync loop.
    pub async fn popular_topics(&self) -> Result<Vec<String>> {
        tokio::time::timeout(self.call_timeout, self.cache.popular_topics()).await?
    }

    /// Replaces a stored result's text and drops the stale cache entry.
    pub async fn correct_result(&self, result_id: Uuid, text: &str) -> Result<bool> {
        let Some(result) = tokio::time::timeout(self.call_timeout, self.store.get_result(result_id)).await?? else {
            return Err(OrmError::NotFound.into());
        };
        let updated = tokio::time::timeout(self.call_timeout, self.store.update_result_text(result_id, text)).await??;
        if updated {
            tokio::time::timeout(self.call_timeout, self.cache.invalidate(&result.topic, &result.language)).await??;
            info!("Corrected result {} for topic {}", result_id, result.topic);
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::model::{NewResult, TaskStatus};
    use crate::errors::ExtractionError;
    use crate::queue::{MemoryQueue, NackPolicy};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct SplitExtractor;

    #[async_trait]
    impl TopicExtractor for SplitExtractor {
        async fn extract(&self, raw: &str, _language: &str) -> Result<Vec<String>> {
            if raw.contains("fail") {
                return Err(ExtractionError::MissingCredentials.into());
            }
            Ok(raw.split(" and ").map(str::to_string).collect())
        }
    }

    struct Fixture {
        service: CrawlService,
        store: Arc<MemoryStore>,
        cache: HotCache,
        queue: TaskQueue,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cache = HotCache::local("svc", Duration::from_secs(60));
        let queue = TaskQueue::new(Arc::new(MemoryQueue::new(NackPolicy::default())), "crawl_queue", 16);
        let service = CrawlService::new(
            store.clone(),
            cache.clone(),
            queue.clone(),
            Arc::new(SplitExtractor),
            Duration::from_secs(1),
        );
        Fixture {
            service,
            store,
            cache,
            queue,
        }
    }

    fn request(topic: &str) -> CrawlRequest {
        CrawlRequest {
            topic: topic.into(),
            sources: vec!["wikipedia".into()],
            language: "en".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_job_persists_pending_task() {
        let fx = fixture();
        let created = fx.service.create_job(request("cats and dogs")).await.unwrap();
        assert_eq!(created.extracted_topics, vec!["cats", "dogs"]);

        let status = fx.service.get_status(created.task_id).await.unwrap();
        assert_eq!(status.status, TaskStatus::Pending);
        assert!(status.result_ids.is_empty());

        let task = fx.store.get_task(created.task_id).await.unwrap().unwrap();
        assert_eq!(task.input, "cats and dogs");
        assert!(fx.queue.dead_letters(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_extraction_uses_raw_input() {
        let fx = fixture();
        let created = fx.service.create_job(request("please fail")).await.unwrap();
        assert_eq!(created.extracted_topics, vec!["please fail"]);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected() {
        let fx = fixture();
        for bad in [
            request(" "),
            CrawlRequest {
                sources: vec![],
                ..request("cats")
            },
            CrawlRequest {
                language: String::new(),
                ..request("cats")
            },
        ] {
            let err = fx.service.create_job(bad).await.unwrap_err();
            assert!(err.is_task());
            assert!(!err.is_retryable());
        }
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let fx = fixture();
        assert!(fx.service.get_status(Uuid::new_v4()).await.unwrap_err().is_not_found());
        assert!(fx.service.get_result(Uuid::new_v4()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_correct_result_invalidates_cache() {
        let fx = fixture();
        let stored = fx
            .store
            .insert_result_if_absent(NewResult {
                task_id: Uuid::new_v4(),
                topic: "cats".into(),
                source: "wikipedia".into(),
                language: "en".into(),
                text: "Cats are dgos".into(),
            })
            .await
            .unwrap();
        fx.cache
            .put(&crate::common::model::ResultSnapshot::from(&stored))
            .await
            .unwrap();

        assert!(fx.service.correct_result(stored.id, "Cats are cats").await.unwrap());
        assert_eq!(fx.service.get_result(stored.id).await.unwrap().text, "Cats are cats");
        assert!(fx.cache.get("cats", "en").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_popular_topics_reads_cache() {
        let fx = fixture();
        assert!(fx.service.popular_topics().await.unwrap().is_empty());
        fx.cache.put_popular_topics(&["A".into(), "B".into()]).await.unwrap();
        assert_eq!(fx.service.popular_topics().await.unwrap(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_hung_cache_read_times_out() {
        let store = Arc::new(MemoryStore::new());
        let queue = TaskQueue::new(Arc::new(MemoryQueue::new(NackPolicy::default())), "crawl_queue", 16);
        let service = CrawlService::new(
            store,
            crate::engine::cache_sync::tests::hanging_cache(),
            queue,
            Arc::new(SplitExtractor),
            Duration::from_millis(100),
        );

        let err = tokio::time::timeout(Duration::from_secs(2), service.popular_topics())
            .await
            .expect("popular_topics must be bounded")
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
