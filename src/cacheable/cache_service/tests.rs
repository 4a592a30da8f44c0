use super::{CacheAble, CacheService};
use deadpool_redis::Pool;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

fn redis_test_pool() -> Option<Pool> {
    let url = env::var("TOPICRAWL_REDIS_TEST_URL").ok()?;
    let cfg = deadpool_redis::Config::from_url(url);
    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1)).ok()
}

#[derive(Deserialize, Serialize, Debug, PartialEq)]
struct Digest {
    topic: String,
    words: u32,
}

impl CacheAble for Digest {
    fn field() -> impl AsRef<str> {
        "digest"
    }
}

#[tokio::test]
async fn cacheable_send_and_sync_roundtrip() {
    let cache = CacheService::new(None, "app".to_string(), Some(Duration::from_secs(60)), None);

    let digest = Digest {
        topic: "Photosynthesis".to_string(),
        words: 120,
    };
    digest.send("p1", &cache).await.expect("send should succeed");

    let fetched = Digest::sync("p1", &cache).await.expect("sync should succeed");
    assert_eq!(fetched, Some(digest));
    assert_eq!(Digest::cache_id("p1", &cache), "app:digest:p1");

    Digest::delete("p1", &cache).await.expect("delete should succeed");
    assert_eq!(Digest::sync("p1", &cache).await.unwrap(), None);
}

#[tokio::test]
async fn local_backend_ttl_expires() {
    let cache = CacheService::new(None, "single-node".to_string(), None, None);

    cache
        .set("k1", b"v1", Some(Duration::from_millis(30)))
        .await
        .expect("set should succeed");
    assert_eq!(cache.get("k1").await.unwrap(), Some(b"v1".to_vec()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.get("k1").await.unwrap(), None);
}

#[tokio::test]
async fn corrupt_payload_is_a_serde_error() {
    let cache = CacheService::new(None, "app".to_string(), None, None);
    cache.set("app:digest:bad", b"{not json", None).await.unwrap();
    let err = Digest::sync("bad", &cache).await.unwrap_err();
    assert!(matches!(err, crate::errors::CacheError::Serde(_)));
}

#[tokio::test]
async fn redis_backend_roundtrip_with_compression() {
    let Some(pool) = redis_test_pool() else {
        eprintln!("skipping redis cache test: TOPICRAWL_REDIS_TEST_URL not set");
        return;
    };
    let cache = CacheService::new(Some(pool), "topicrawl-test".to_string(), Some(Duration::from_secs(30)), Some(8));
    cache.ping().await.expect("redis should answer ping");

    let digest = Digest {
        topic: "a fairly long topic name that crosses the threshold".to_string(),
        words: 9,
    };
    digest.send("compressed", &cache).await.unwrap();
    assert_eq!(Digest::sync("compressed", &cache).await.unwrap(), Some(digest));
    Digest::delete("compressed", &cache).await.unwrap();
}
