//! Durable job queue with explicit settlement.
//!
//! Backends deliver [`Message`]s; the consumer settles each one with
//! [`Message::ack`], [`Message::nack`] (redeliver under the [`NackPolicy`])
//! or [`Message::reject`] (straight to the dead-letter topic). A message
//! that is never settled stays pending and is redelivered by the backend.

pub mod memory;
pub mod redis;
pub mod task_queue;

use async_trait::async_trait;
use log::{error, warn};
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::errors::{QueueError, Result};

pub use memory::MemoryQueue;
pub use self::redis::RedisQueue;
pub use task_queue::{JobHandler, TaskQueue};


pub const HEADER_ATTEMPT: &str = "x-attempt";
pub const HEADER_CREATED_AT: &str = "x-created-at";
pub const HEADER_NACK_REASON: &str = "x-nack-reason";

/// Settlement sent back to the backend for a delivered message.
#[derive(Debug, Clone)]
pub enum AckAction {
    /// Processed; remove from the queue.
    Ack,
    /// Failed but may succeed later: reason, payload, headers.
    Nack(String, Arc<Vec<u8>>, Arc<HashMap<String, String>>),
    /// Will never succeed; dead-letter immediately: reason, payload.
    Reject(String, Arc<Vec<u8>>),
}

#[derive(Debug, Clone, Copy)]
pub struct NackPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for NackPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackDisposition {
    Retry { next_attempt: u32 },
    Dlq,
}

pub fn decide_nack(policy: NackPolicy, attempt: u32) -> NackDisposition {
    if policy.max_retries > 0 && attempt < policy.max_retries {
        NackDisposition::Retry {
            next_attempt: attempt.saturating_add(1),
        }
    } else {
        NackDisposition::Dlq
    }
}

pub(crate) fn parse_attempt(headers: &HashMap<String, String>) -> u32 {
    headers
        .get(HEADER_ATTEMPT)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0)
}

pub(crate) fn default_headers() -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert(HEADER_ATTEMPT.to_string(), "0".to_string());
    headers.insert(
        HEADER_CREATED_AT.to_string(),
        chrono::Utc::now().timestamp_millis().to_string(),
    );
    headers
}

/// Entry read back from a dead-letter topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub id: String,
    pub payload: Vec<u8>,
    pub reason: String,
    pub original_id: String,
}

/// A delivered message. Exactly one of `ack`, `nack` or `reject` should be called.
#[derive(Clone)]
pub struct Message {
    pub payload: Arc<Vec<u8>>,
    pub id: String,
    pub headers: Arc<HashMap<String, String>>,
    pub ack_tx: mpsc::Sender<(String, AckAction)>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("payload_len", &self.payload.len())
            .field("headers", &self.headers)
            .finish()
    }
}

impl Message {
    pub fn attempt(&self) -> u32 {
        parse_attempt(&self.headers)
    }

    async fn settle(&self, action: AckAction) -> Result<()> {
        self.ack_tx
            .send((self.id.clone(), action))
            .await
            .map_err(|_| QueueError::OperationFailed("ack channel closed".into()).into())
    }

    pub async fn ack(&self) -> Result<()> {
        self.settle(AckAction::Ack).await
    }

    pub async fn nack(&self, reason: impl Into<String>) -> Result<()> {
        self.settle(AckAction::Nack(reason.into(), self.payload.clone(), self.headers.clone()))
            .await
    }

    pub async fn reject(&self, reason: impl Into<String>) -> Result<()> {
        self.settle(AckAction::Reject(reason.into(), self.payload.clone())).await
    }
}

#[async_trait]
pub trait MqBackend: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.publish_with_headers(topic, payload, &default_headers()).await
    }

    async fn publish_with_headers(&self, topic: &str, payload: &[u8], headers: &HashMap<String, String>) -> Result<()>;

    /// Starts delivering messages of `topic` into `sender` until it is closed.
    async fn subscribe(&self, topic: &str, sender: mpsc::Sender<Message>) -> Result<()>;

    /// Send a message to the Dead Letter Queue (DLQ).
    async fn send_to_dlq(&self, topic: &str, id: &str, payload: &[u8], reason: &str) -> Result<()>;

    /// Read messages from the Dead Letter Queue (DLQ).
    async fn read_dlq(&self, topic: &str, count: usize) -> Result<Vec<DeadLetter>>;

    async fn clean_storage(&self) -> Result<()> {
        Ok(())
    }

    /// Releases the backend's connections. Subscriptions stop delivering.
    async fn close(&self) {}
}

/// Applies a nack under `policy`: republish with a bumped attempt header, or dead-letter.
pub(crate) async fn redeliver_or_dead_letter<B>(
    backend: &B,
    policy: NackPolicy,
    topic: &str,
    id: &str,
    reason: &str,
    payload: &[u8],
    headers: &HashMap<String, String>,
) -> Result<NackDisposition>
where
    B: MqBackend + ?Sized,
{
    let disposition = decide_nack(policy, parse_attempt(headers));
    let action_label = match disposition {
        NackDisposition::Retry { .. } => "retry",
        NackDisposition::Dlq => "dlq",
    };
    counter!("queue_nack_total", "topic" => topic.to_string(), "action" => action_label).increment(1);

    match disposition {
        NackDisposition::Retry { next_attempt } => {
            if policy.backoff_ms > 0 {
                tokio::time::sleep(Duration::from_millis(policy.backoff_ms)).await;
            }
            let mut next_headers = headers.clone();
            next_headers.insert(HEADER_ATTEMPT.to_string(), next_attempt.to_string());
            next_headers.insert(HEADER_NACK_REASON.to_string(), reason.to_string());
            if let Err(e) = backend.publish_with_headers(topic, payload, &next_headers).await {
                error!("Failed to republish {} on {}: {}", id, topic, e);
                return Err(e);
            }
            warn!("Message {} on {} redelivered (attempt {}): {}", id, topic, next_attempt, reason);
        }
        NackDisposition::Dlq => {
            backend.send_to_dlq(topic, id, payload, reason).await?;
            warn!("Message {} on {} dead-lettered: {}", id, topic, reason);
        }
    }
    Ok(disposition)
}
