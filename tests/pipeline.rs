use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use topicrawl::cacheable::HotCache;
use topicrawl::common::model::config::{CrawlerConfig, ExtractionConfig};
use topicrawl::common::model::{CrawlRequest, TaskStatus};
use topicrawl::engine::{CacheSyncLoop, CrawlService, Resolver, ResolverConfig, Worker};
use topicrawl::extraction::{GeminiExtractor, TopicExtractor};
use topicrawl::queue::{JobHandler, MemoryQueue, NackPolicy, TaskQueue};
use topicrawl::source::{SourceRegistry, WikipediaSource};
use topicrawl::store::{DataStore, MemoryStore};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Pipeline {
    store: Arc<MemoryStore>,
    cache: HotCache,
    service: CrawlService,
    queue: TaskQueue,
    worker: Worker,
    crawler: CrawlerConfig,
}

async fn wikipedia() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .and(query_param("titles", "Photosynthesis"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "query": {"pages": [{"title": "Photosynthesis", "extract": "Photosynthesis converts light into chemical energy."}]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "query": {"pages": [{"title": "Unknown", "missing": true}]}
        })))
        .mount(&server)
        .await;
    server
}

/// Pipeline with an extractor that has no credentials, so extraction always
/// degrades to the raw input.
async fn pipeline(server: &MockServer) -> Pipeline {
    let crawler = CrawlerConfig {
        call_timeout_secs: 2,
        reissue_interval_ms: 50,
        wikipedia_endpoint: format!("{}/w/api.php", server.uri()),
        ..CrawlerConfig::default()
    };
    let store = Arc::new(MemoryStore::new());
    let cache = HotCache::local("it", Duration::from_secs(3600));
    let queue = TaskQueue::new(Arc::new(MemoryQueue::new(NackPolicy::default())), "crawl_queue", 16);

    let sources = SourceRegistry::new();
    sources.register(Arc::new(
        WikipediaSource::new(crawler.wikipedia_endpoint.clone(), crawler.call_timeout()).unwrap(),
    ));
    let extraction = ExtractionConfig {
        api_key: None,
        ..ExtractionConfig::default()
    };
    let extractor: Arc<dyn TopicExtractor> = Arc::new(GeminiExtractor::new(&extraction, crawler.call_timeout()).unwrap());

    let resolver = Resolver::new(store.clone(), cache.clone(), sources, ResolverConfig::from(&crawler));
    let worker = Worker::new(store.clone(), resolver);
    let service = CrawlService::new(store.clone(), cache.clone(), queue.clone(), extractor, crawler.call_timeout());
    Pipeline {
        store,
        cache,
        service,
        queue,
        worker,
        crawler,
    }
}

async fn wait_for_terminal(service: &CrawlService, task_id: Uuid) -> TaskStatus {
    for _ in 0..100 {
        let status = service.get_status(task_id).await.unwrap().status;
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("task {task_id} never reached a terminal state");
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
async fn test_submitted_job_is_crawled_to_completion() {
    let server = wikipedia().await;
    let p = pipeline(&server).await;

    let shutdown = CancellationToken::new();
    let consumer = {
        let queue = p.queue.clone();
        let handler: Arc<dyn JobHandler> = Arc::new(p.worker.clone());
        let shutdown = shutdown.clone();
        tokio::spawn(async move { queue.consume(handler, shutdown).await })
    };

    let created = p.service.create_job(request("Photosynthesis")).await.unwrap();
    assert_eq!(created.extracted_topics, vec!["Photosynthesis"]);

    assert_eq!(wait_for_terminal(&p.service, created.task_id).await, TaskStatus::Completed);
    let status = p.service.get_status(created.task_id).await.unwrap();
    assert_eq!(status.result_ids.len(), 1);
    assert!(status.error.is_none());

    let result = p.service.get_result(status.result_ids[0]).await.unwrap();
    assert_eq!(result.topic, "Photosynthesis");
    assert_eq!(result.source, "wikipedia");
    assert!(result.text.starts_with("Photosynthesis converts light"));

    let cached = p.cache.get("Photosynthesis", "en").await.unwrap().unwrap();
    assert_eq!(cached.result_id, result.result_id);
    assert!(p.queue.dead_letters(10).await.unwrap().is_empty());

    shutdown.cancel();
    consumer.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_degraded_extraction_still_finishes() {
    let server = wikipedia().await;
    let p = pipeline(&server).await;

    let shutdown = CancellationToken::new();
    let consumer = {
        let queue = p.queue.clone();
        let handler: Arc<dyn JobHandler> = Arc::new(p.worker.clone());
        let shutdown = shutdown.clone();
        tokio::spawn(async move { queue.consume(handler, shutdown).await })
    };

    let raw = "tell me something about qwzx";
    let created = p.service.create_job(request(raw)).await.unwrap();
    assert_eq!(created.extracted_topics, vec![raw]);

    assert_eq!(wait_for_terminal(&p.service, created.task_id).await, TaskStatus::Completed);
    let status = p.service.get_status(created.task_id).await.unwrap();
    assert!(status.result_ids.is_empty());
    assert_eq!(p.store.result_count(), 0);

    shutdown.cancel();
    consumer.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_popular_topics_are_synced_to_cache() {
    let server = wikipedia().await;
    let p = pipeline(&server).await;

    for _ in 0..3 {
        let created = p.service.create_job(request("Photosynthesis")).await.unwrap();
        let job = topicrawl::common::model::JobMessage::from(
            &p.store.get_task(created.task_id).await.unwrap().unwrap(),
        );
        p.worker.handle(job).await.unwrap();
    }
    // Resolved from the store after the first crawl.
    assert_eq!(p.store.result_count(), 1);

    let sync = CacheSyncLoop::new(p.store.clone(), p.cache.clone(), &p.crawler);
    let report = sync.sync_once().await.unwrap();
    assert_eq!(report.topics, vec!["Photosynthesis"]);
    assert_eq!(p.service.popular_topics().await.unwrap(), vec!["Photosynthesis"]);
}
