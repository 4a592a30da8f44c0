use async_trait::async_trait;
use dashmap::DashSet;
use log::{debug, error, info, warn};
use redis::streams::{StreamAutoClaimReply, StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, FromRedisValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

use super::{AckAction, DeadLetter, Message, MqBackend, NackPolicy, redeliver_or_dead_letter};
use crate::common::model::config::ChannelConfig;
use crate::errors::{QueueError, Result};
use crate::utils::connector::create_redis_pool;

/// Entry ids this consumer has delivered but not yet settled.
///
/// The listener only reads when nothing is in flight, so a backlog stays in
/// the stream where other consumers can take it.
#[derive(Default)]
pub(crate) struct InFlight {
    ids: DashSet<String>,
    idle: Notify,
}

impl InFlight {
    /// Returns false when `id` is already being handled here.
    pub(crate) fn track(&self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    pub(crate) fn settle(&self, id: &str) {
        self.ids.remove(id);
        if self.ids.is_empty() {
            self.idle.notify_waiters();
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.ids.is_empty()
    }

    /// Waits until every delivered entry is settled, or at most `poll`.
    pub(crate) async fn wait_idle(&self, poll: Duration) {
        if !self.is_idle() {
            let _ = tokio::time::timeout(poll, self.idle.notified()).await;
        }
    }
}

/// Redis Streams backend: one stream per topic, one consumer group per
/// namespace, `<topic>:dlq` streams for dead letters.
#[derive(Clone)]
pub struct RedisQueue {
    pool: deadpool_redis::Pool,
    in_flight: Arc<InFlight>,
    group_id: String,
    consumer_name: String,
    namespace: String,
    policy: NackPolicy,
    claim_min_idle: u64,
    claim_interval: u64,
    minid_time: u64,
}

impl RedisQueue {
    pub fn new(channel_config: &ChannelConfig, namespace: &str) -> Result<Self> {
        let redis_config = channel_config
            .redis
            .as_ref()
            .ok_or(QueueError::ConnectionFailed)?;
        let pool = create_redis_pool(redis_config).ok_or(QueueError::ConnectionFailed)?;
        Ok(Self::with_pool(
            pool,
            namespace,
            NackPolicy {
                max_retries: channel_config.max_retries,
                backoff_ms: channel_config.backoff_ms,
            },
            channel_config.claim_min_idle,
            channel_config.claim_interval,
            channel_config.minid_time,
        ))
    }

    pub fn with_pool(
        pool: deadpool_redis::Pool,
        namespace: &str,
        policy: NackPolicy,
        claim_min_idle: u64,
        claim_interval: u64,
        minid_time: u64,
    ) -> Self {
        Self {
            pool,
            in_flight: Arc::new(InFlight::default()),
            group_id: format!("{}:crawler_group", namespace),
            consumer_name: uuid::Uuid::new_v4().to_string(),
            namespace: namespace.to_string(),
            policy,
            claim_min_idle,
            claim_interval,
            minid_time,
        }
    }

    fn stream_key(&self, topic: &str) -> String {
        format!("{}:{}", self.namespace, topic)
    }

    fn dlq_key(&self, topic: &str) -> String {
        format!("{}:{}:dlq", self.namespace, topic)
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        Ok(self
            .pool
            .get()
            .await
            .map_err(|_| QueueError::ConnectionFailed)?)
    }

    async fn ensure_group(&self, conn: &mut deadpool_redis::Connection, stream: &str) {
        // "0" so jobs published before the first consumer starts are delivered
        match conn
            .xgroup_create_mkstream::<&str, &str, &str, ()>(stream, &self.group_id, "0")
            .await
        {
            Ok(_) => info!("Created consumer group {} for stream {}", self.group_id, stream),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => error!("Failed to create consumer group: {}", e),
        }
    }

    fn to_message(entry: &StreamId, ack_tx: &mpsc::Sender<(String, AckAction)>) -> Option<Message> {
        let payload = entry
            .map
            .get("payload")
            .and_then(|v| Vec::<u8>::from_redis_value(v).ok())?;
        let headers: HashMap<String, String> = entry
            .map
            .get("headers")
            .and_then(|v| String::from_redis_value(v).ok())
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Some(Message {
            payload: Arc::new(payload),
            id: entry.id.clone(),
            headers: Arc::new(headers),
            ack_tx: ack_tx.clone(),
        })
    }

    async fn xack(&self, stream: &str, id: &str) {
        match self.conn().await {
            Ok(mut conn) => {
                let acked: redis::RedisResult<i64> = conn.xack(stream, &self.group_id, &[id]).await;
                if let Err(e) = acked {
                    error!("XACK {} on {} failed: {}", id, stream, e);
                }
            }
            Err(e) => error!("XACK {} on {} skipped: {}", id, stream, e),
        }
    }

    /// Settles messages. A failed republish leaves the entry pending so the
    /// reclaim loop redelivers it.
    fn spawn_ack_listener(&self, topic: String, mut ack_rx: mpsc::Receiver<(String, AckAction)>) {
        let queue = self.clone();
        tokio::spawn(async move {
            let stream = queue.stream_key(&topic);
            while let Some((id, action)) = ack_rx.recv().await {
                let settled = match action {
                    AckAction::Ack => true,
                    AckAction::Nack(reason, payload, headers) => redeliver_or_dead_letter(
                        &queue,
                        queue.policy,
                        &topic,
                        &id,
                        &reason,
                        &payload,
                        &headers,
                    )
                    .await
                    .is_ok(),
                    AckAction::Reject(reason, payload) => {
                        match queue.send_to_dlq(&topic, &id, &payload, &reason).await {
                            Ok(()) => {
                                warn!("Message {} on {} dead-lettered: {}", id, topic, reason);
                                true
                            }
                            Err(e) => {
                                error!("Failed to dead-letter {}: {}", id, e);
                                false
                            }
                        }
                    }
                };
                if settled {
                    queue.xack(&stream, &id).await;
                }
                queue.in_flight.settle(&id);
            }
            debug!("Ack listener for {} stopped", stream);
        });
    }

    /// Periodically claims entries other consumers left pending too long.
    /// Runs only while this consumer is idle and never redelivers an entry
    /// it is still handling.
    fn spawn_reclaimer(&self, topic: String, sender: mpsc::Sender<Message>, ack_tx: mpsc::Sender<(String, AckAction)>) {
        if self.claim_interval == 0 {
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            let stream = queue.stream_key(&topic);
            let mut ticker = tokio::time::interval(Duration::from_millis(queue.claim_interval));
            loop {
                ticker.tick().await;
                if sender.is_closed() {
                    return;
                }
                if !queue.in_flight.is_idle() {
                    continue;
                }
                let mut conn = match queue.conn().await {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("Reclaim on {} skipped: {}", stream, e);
                        continue;
                    }
                };
                let reply: redis::RedisResult<StreamAutoClaimReply> = redis::cmd("XAUTOCLAIM")
                    .arg(&stream)
                    .arg(&queue.group_id)
                    .arg(&queue.consumer_name)
                    .arg(queue.claim_min_idle)
                    .arg("0-0")
                    .arg("COUNT")
                    .arg(1)
                    .query_async(&mut conn)
                    .await;
                match reply {
                    Ok(reply) => {
                        for entry in &reply.claimed {
                            if !queue.in_flight.track(&entry.id) {
                                debug!("Skipping reclaim of in-flight {} on {}", entry.id, stream);
                                continue;
                            }
                            let Some(msg) = Self::to_message(entry, &ack_tx) else {
                                queue.in_flight.settle(&entry.id);
                                continue;
                            };
                            info!("Reclaimed stale message {} on {}", msg.id, stream);
                            if sender.send(msg).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!("XAUTOCLAIM on {} failed: {}", stream, e),
                }
            }
        });
    }
}

#[async_trait]
impl MqBackend for RedisQueue {
    async fn publish_with_headers(&self, topic: &str, payload: &[u8], headers: &HashMap<String, String>) -> Result<()> {
        let mut conn = self.conn().await?;
        let encoded_headers =
            serde_json::to_string(headers).map_err(|e| QueueError::SerializationFailed(Box::new(e)))?;

        let _: String = redis::cmd("XADD")
            .arg(self.stream_key(topic))
            .arg("*")
            .arg("payload")
            .arg(payload)
            .arg("headers")
            .arg(encoded_headers)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::PushFailed(Box::new(e)))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, sender: mpsc::Sender<Message>) -> Result<()> {
        let stream = self.stream_key(topic);
        {
            let mut conn = self.conn().await?;
            self.ensure_group(&mut conn, &stream).await;
        }

        let (ack_tx, ack_rx) = mpsc::channel::<(String, AckAction)>(1000);
        self.spawn_ack_listener(topic.to_string(), ack_rx);
        self.spawn_reclaimer(topic.to_string(), sender.clone(), ack_tx.clone());

        let queue = self.clone();
        tokio::spawn(async move {
            info!(
                "Starting Redis stream listener for {} (Group: {}, Consumer: {})",
                stream, queue.group_id, queue.consumer_name
            );
            loop {
                if sender.is_closed() {
                    info!("Subscriber for {} gone, stopping listener", stream);
                    return;
                }
                if !queue.in_flight.is_idle() {
                    queue.in_flight.wait_idle(Duration::from_millis(500)).await;
                    continue;
                }
                let mut conn = match queue.conn().await {
                    Ok(c) => c,
                    Err(e) => {
                        error!("Failed to connect to Redis for subscription: {}. Retrying in 5s...", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                // XREADGROUP GROUP group consumer BLOCK 2000 COUNT 1 STREAMS topic >
                let opts = StreamReadOptions::default()
                    .group(&queue.group_id, &queue.consumer_name)
                    .block(2000)
                    .count(1);
                let result: redis::RedisResult<Option<StreamReadReply>> =
                    conn.xread_options(&[&stream], &[">"], &opts).await;

                match result {
                    Ok(Some(reply)) => {
                        for key in reply.keys {
                            for entry in key.ids {
                                let Some(msg) = Self::to_message(&entry, &ack_tx) else {
                                    warn!("Entry {} on {} has no payload, acking", entry.id, stream);
                                    queue.xack(&stream, &entry.id).await;
                                    continue;
                                };
                                queue.in_flight.track(&msg.id);
                                if sender.send(msg).await.is_err() {
                                    warn!("No active subscribers for {}, stopping listener", stream);
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Error reading from Redis stream: {}. Retrying in 5s...", e);
                        if e.code() == Some("NOGROUP") {
                            warn!("Consumer group missing for {}, attempting to recreate...", stream);
                            queue.ensure_group(&mut conn, &stream).await;
                        }
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Ok(())
    }

    async fn send_to_dlq(&self, topic: &str, id: &str, payload: &[u8], reason: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("XADD")
            .arg(self.dlq_key(topic))
            .arg("*")
            .arg("payload")
            .arg(payload)
            .arg("reason")
            .arg(reason)
            .arg("original_id")
            .arg(id)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::PushFailed(Box::new(e)))?;
        Ok(())
    }

    async fn read_dlq(&self, topic: &str, count: usize) -> Result<Vec<DeadLetter>> {
        let mut conn = self.conn().await?;
        let reply: StreamRangeReply = conn
            .xrange_count(self.dlq_key(topic), "-", "+", count)
            .await
            .map_err(|e| QueueError::PopFailed(Box::new(e)))?;

        Ok(reply
            .ids
            .into_iter()
            .map(|entry| {
                let field = |name: &str| {
                    entry
                        .map
                        .get(name)
                        .and_then(|v| String::from_redis_value(v).ok())
                        .unwrap_or_default()
                };
                DeadLetter {
                    id: entry.id.clone(),
                    payload: entry
                        .map
                        .get("payload")
                        .and_then(|v| Vec::<u8>::from_redis_value(v).ok())
                        .unwrap_or_default(),
                    reason: field("reason"),
                    original_id: field("original_id"),
                }
            })
            .collect())
    }

    async fn close(&self) {
        self.pool.close();
    }

    async fn clean_storage(&self) -> Result<()> {
        if self.minid_time == 0 {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let retention_ms = self.minid_time as i64 * 60 * 60 * 1000;
        let min_id = (chrono::Utc::now().timestamp_millis() - retention_ms).max(0);

        let pattern = format!("{}:*", self.namespace);
        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::OperationFailed(Box::new(e)))?;
            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        for key in keys {
            let key_type: String = redis::cmd("TYPE")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .unwrap_or_else(|_| "none".to_string());
            if key_type != "stream" {
                continue;
            }
            let trimmed: redis::RedisResult<i64> = redis::cmd("XTRIM")
                .arg(&key)
                .arg("MINID")
                .arg("~")
                .arg(min_id.to_string())
                .query_async(&mut conn)
                .await;
            if let Err(e) = trimmed {
                warn!("Failed to trim stream {}: {}", key, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_refuses_duplicate_delivery() {
        let in_flight = InFlight::default();
        assert!(in_flight.is_idle());
        assert!(in_flight.track("1-0"));
        assert!(!in_flight.track("1-0"));
        assert!(!in_flight.is_idle());
        in_flight.settle("1-0");
        assert!(in_flight.is_idle());
        assert!(in_flight.track("1-0"));
    }

    #[tokio::test]
    async fn test_wait_idle_returns_after_settle() {
        let in_flight = Arc::new(InFlight::default());
        in_flight.track("7-0");
        let waiter = {
            let in_flight = in_flight.clone();
            tokio::spawn(async move { in_flight.wait_idle(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        in_flight.settle("7-0");
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    fn test_queue() -> Option<RedisQueue> {
        let url = std::env::var("TOPICRAWL_REDIS_TEST_URL").ok()?;
        let pool = deadpool_redis::Config::from_url(url)
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .ok()?;
        let namespace = format!("topicrawl-test-{}", uuid::Uuid::new_v4());
        Some(RedisQueue::with_pool(pool, &namespace, NackPolicy::default(), 60_000, 0, 0))
    }

    #[tokio::test]
    async fn test_publish_consume_and_dead_letter() {
        let Some(queue) = test_queue() else {
            eprintln!("skipping redis queue test: TOPICRAWL_REDIS_TEST_URL not set");
            return;
        };
        queue.publish("jobs", b"first").await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        queue.subscribe("jobs", tx).await.unwrap();
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload.as_slice(), b"first");
        assert_eq!(msg.attempt(), 0);

        msg.reject("bad payload").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let dead = queue.read_dlq("jobs", 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "bad payload");
        assert_eq!(dead[0].original_id, msg.id);
    }
}
