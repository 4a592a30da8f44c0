use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use super::resolver::Resolver;
use crate::common::model::{JobMessage, TaskStatus};
use crate::errors::{Error, Result, TaskError};
use crate::queue::JobHandler;
use crate::store::DataStore;

/// Runs crawl jobs: drives the task through its states and records what the
/// resolver finds for every (topic, source) pair.
#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn DataStore>,
    resolver: Resolver,
    call_timeout: Duration,
}

impl Worker {
    pub fn new(store: Arc<dyn DataStore>, resolver: Resolver) -> Self {
        let call_timeout = resolver.config().call_timeout;
        Self {
            store,
            resolver,
            call_timeout,
        }
    }

    async fn set_status(&self, id: Uuid, status: TaskStatus, error: Option<String>) -> Result<bool> {
        tokio::time::timeout(self.call_timeout, self.store.update_status(id, status, error)).await?
    }

    async fn run(&self, job: JobMessage) -> Result<()> {
        let task_id = job.task_id;
        let task = tokio::time::timeout(self.call_timeout, self.store.get_task(task_id))
            .await??
            .ok_or_else(|| Error::task_not_found(task_id))?;

        if task.status.is_terminal() {
            info!("Task {} already {}, skipping redelivery", task_id, task.status);
            return Ok(());
        }

        // A failure here leaves the task PENDING and the message redeliverable.
        if !self.set_status(task_id, TaskStatus::InProgress, None).await? {
            info!("Task {} left the pending state concurrently, skipping", task_id);
            return Ok(());
        }
        info!("Processing task {}", task_id);

        match self.crawl(&job).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Error processing task {}: {}", task_id, e);
                match self.set_status(task_id, TaskStatus::Failed, Some(e.to_string())).await {
                    Ok(_) => Err(TaskError::JobFailed(e.to_string().into()).into()),
                    Err(persist_err) => {
                        error!("Could not mark task {} failed: {}", task_id, persist_err);
                        Err(e)
                    }
                }
            }
        }
    }

    async fn crawl(&self, job: &JobMessage) -> Result<()> {
        let task_id = job.task_id;
        let language = job.data.language.as_str();
        for topic in &job.data.topics {
            info!("Crawling topic: {}", topic);
            for source in &job.data.sources {
                let resolution = match self.resolver.resolve(task_id, topic, language, source).await {
                    Ok(resolution) => resolution,
                    Err(e) => {
                        warn!("Error crawling topic {} from {}: {}", topic, source, e);
                        continue;
                    }
                };
                match resolution.result_id {
                    Some(result_id) if !resolution.is_empty() => {
                        tokio::time::timeout(self.call_timeout, self.store.append_result(task_id, result_id)).await??;
                    }
                    _ => info!("No content for topic {} from {}", topic, source),
                }
            }
        }

        self.set_status(task_id, TaskStatus::Completed, None).await?;
        info!("Task {} completed successfully", task_id);
        Ok(())
    }
}

#[async_trait]
impl JobHandler for Worker {
    async fn handle(&self, job: JobMessage) -> Result<()> {
        let span = tracing::info_span!("crawl_job", task_id = %job.task_id, topics = job.data.topics.len());
        self.run(job).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cacheable::HotCache;
    use crate::common::model::{CrawlResult, NewResult, PipelineMetadata, Task};
    use crate::engine::resolver::ResolverConfig;
    use crate::errors::OrmError;
    use crate::source::{Source, SourceRegistry};
    use crate::store::MemoryStore;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn assert_lifecycle_prefix(applied: &[TaskStatus]) {
        // Same-state updates are no-ops, so collapse repeats first.
        let mut seen: Vec<TaskStatus> = applied.to_vec();
        seen.dedup();
        let ok = matches!(
            seen.as_slice(),
            [] | [TaskStatus::InProgress]
                | [TaskStatus::InProgress, TaskStatus::Completed]
                | [TaskStatus::InProgress, TaskStatus::Failed]
        );
        assert!(ok, "status sequence {seen:?} is not a lifecycle prefix");
    }

    struct StaticSource(&'static str);

    #[async_trait]
    impl Source for StaticSource {
        fn name(&self) -> &str {
            "wikipedia"
        }

        async fn fetch(&self, topic: &str, _language: &str) -> Result<String> {
            Ok(if topic == "Qwzx" { String::new() } else { format!("{}: {}", topic, self.0) })
        }
    }

    /// Delegates to a memory store, refuses every append when `reject_appends`
    /// is set and records each status update the store applied.
    struct RejectingStore {
        inner: MemoryStore,
        reject_appends: bool,
        fail_status_updates: bool,
        flaky_in_progress: AtomicUsize,
        applied: Mutex<Vec<TaskStatus>>,
    }

    impl RejectingStore {
        fn new(reject_appends: bool, fail_status_updates: bool) -> Self {
            Self {
                inner: MemoryStore::new(),
                reject_appends,
                fail_status_updates,
                flaky_in_progress: AtomicUsize::new(0),
                applied: Mutex::new(Vec::new()),
            }
        }

        fn applied(&self) -> Vec<TaskStatus> {
            self.applied.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DataStore for RejectingStore {
        async fn create_task(&self, task: &Task) -> Result<()> {
            self.inner.create_task(task).await
        }
        async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
            self.inner.get_task(id).await
        }
        async fn update_status(&self, id: Uuid, status: TaskStatus, error: Option<String>) -> Result<bool> {
            if self.fail_status_updates && status == TaskStatus::Failed {
                return Err(OrmError::ConnectionError("db down".into()).into());
            }
            if status == TaskStatus::InProgress
                && self
                    .flaky_in_progress
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(OrmError::ConnectionError("transient blip".into()).into());
            }
            let applied = self.inner.update_status(id, status, error).await?;
            if applied {
                self.applied.lock().unwrap().push(status);
            }
            Ok(applied)
        }
        async fn append_result(&self, task_id: Uuid, result_id: Uuid) -> Result<bool> {
            if self.reject_appends {
                return Err(OrmError::InvalidData("append rejected".into()).into());
            }
            self.inner.append_result(task_id, result_id).await
        }
        async fn insert_result_if_absent(&self, result: NewResult) -> Result<CrawlResult> {
            self.inner.insert_result_if_absent(result).await
        }
        async fn get_result(&self, id: Uuid) -> Result<Option<CrawlResult>> {
            self.inner.get_result(id).await
        }
        async fn latest_result(&self, topic: &str, language: &str, source: &str) -> Result<Option<CrawlResult>> {
            self.inner.latest_result(topic, language, source).await
        }
        async fn latest_result_for_topic(&self, topic: &str) -> Result<Option<CrawlResult>> {
            self.inner.latest_result_for_topic(topic).await
        }
        async fn update_result_text(&self, id: Uuid, text: &str) -> Result<bool> {
            self.inner.update_result_text(id, text).await
        }
        async fn popular_topics(&self, limit: usize, since: DateTime<Utc>) -> Result<Vec<String>> {
            self.inner.popular_topics(limit, since).await
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    fn worker_over(store: Arc<dyn DataStore>) -> Worker {
        let sources = SourceRegistry::new();
        sources.register(Arc::new(StaticSource("a plant process")));
        let resolver = Resolver::new(
            store.clone(),
            HotCache::local("test", Duration::from_secs(60)),
            sources,
            ResolverConfig {
                call_timeout: Duration::from_secs(1),
                deadline_grace: Duration::from_millis(100),
                reissue_interval: Duration::from_millis(20),
            },
        );
        Worker::new(store, resolver)
    }

    async fn submit(store: &dyn DataStore, topics: &[&str], sources: &[&str]) -> JobMessage {
        let task = Task::new(
            topics.join(", "),
            topics.iter().map(|t| t.to_string()).collect(),
            sources.iter().map(|s| s.to_string()).collect(),
            "en",
            PipelineMetadata::default(),
        );
        store.create_task(&task).await.unwrap();
        JobMessage::from(&task)
    }

    #[tokio::test]
    async fn test_job_completes_with_results() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker_over(store.clone());
        let job = submit(store.as_ref(), &["Photosynthesis", "Qwzx"], &["wikipedia", "pubmed"]).await;

        worker.handle(job.clone()).await.unwrap();

        let task = store.get_task(job.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result_ids.len(), 1);
        let result = store.get_result(task.result_ids[0]).await.unwrap().unwrap();
        assert_eq!(result.topic, "Photosynthesis");
        assert_eq!(result.source, "wikipedia");
        assert!(task.error.is_none());
    }

    #[tokio::test]
    async fn test_redelivery_of_finished_task_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker_over(store.clone());
        let job = submit(store.as_ref(), &["Photosynthesis"], &["wikipedia"]).await;

        worker.handle(job.clone()).await.unwrap();
        worker.handle(job.clone()).await.unwrap();

        let task = store.get_task(job.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result_ids.len(), 1);
        assert_eq!(store.result_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker_over(store.clone());
        let job = JobMessage::from(&Task::new(
            "ghost",
            vec!["ghost".into()],
            vec!["wikipedia".into()],
            "en",
            PipelineMetadata::default(),
        ));

        let err = worker.handle(job).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_store_rejection_marks_task_failed() {
        let store = Arc::new(RejectingStore::new(true, false));
        let worker = worker_over(store.clone());
        let job = submit(store.as_ref(), &["Photosynthesis"], &["wikipedia"]).await;

        let err = worker.handle(job.clone()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("append rejected"));

        let task = store.get_task(job.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("append rejected"));
        // the fetched content stays stored
        assert_eq!(store.inner.result_count(), 1);
    }

    #[tokio::test]
    async fn test_unpersisted_failure_returns_original_error() {
        let store = Arc::new(RejectingStore::new(true, true));
        let worker = worker_over(store.clone());
        let job = submit(store.as_ref(), &["Photosynthesis"], &["wikipedia"]).await;

        let err = worker.handle(job.clone()).await.unwrap_err();
        assert!(err.to_string().contains("append rejected"));
        let task = store.get_task(job.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_transient_in_progress_failure_is_redelivered() {
        let store = Arc::new(RejectingStore::new(false, false));
        store.flaky_in_progress.store(1, Ordering::SeqCst);
        let worker = worker_over(store.clone());
        let job = submit(store.as_ref(), &["Photosynthesis"], &["wikipedia"]).await;

        let err = worker.handle(job.clone()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.applied().is_empty());
        let task = store.get_task(job.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        worker.handle(job.clone()).await.unwrap();
        let task = store.get_task(job.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result_ids.len(), 1);
        assert_lifecycle_prefix(&store.applied());
    }

    #[tokio::test]
    async fn test_applied_transitions_follow_lifecycle() {
        for (reject_appends, fail_status_updates) in [(false, false), (true, false), (true, true)] {
            let store = Arc::new(RejectingStore::new(reject_appends, fail_status_updates));
            let worker = worker_over(store.clone());
            let job = submit(store.as_ref(), &["Photosynthesis", "Qwzx"], &["wikipedia"]).await;

            let _ = worker.handle(job.clone()).await;
            let _ = worker.handle(job).await;
            assert_lifecycle_prefix(&store.applied());
        }
    }
}
