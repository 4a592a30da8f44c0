use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};

use super::{AckAction, DeadLetter, Message, MqBackend, NackPolicy, redeliver_or_dead_letter};
use crate::errors::{QueueError, Result};

type Entry = (String, Arc<Vec<u8>>, Arc<HashMap<String, String>>);

struct Channel {
    tx: mpsc::UnboundedSender<Entry>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Entry>>>,
}

impl Channel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

#[derive(Default)]
struct Inner {
    seq: AtomicU64,
    acked: AtomicU64,
    channels: DashMap<String, Arc<Channel>>,
    dlq: DashMap<String, Vec<DeadLetter>>,
}

/// In-process queue for single-node runs and tests. One subscriber per topic;
/// messages dropped without settlement are not redelivered.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
    policy: NackPolicy,
}

impl MemoryQueue {
    pub fn new(policy: NackPolicy) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            policy,
        }
    }

    fn channel(&self, topic: &str) -> Arc<Channel> {
        self.inner
            .channels
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(Channel::new()))
            .clone()
    }

    fn next_id(&self) -> String {
        format!("mem-{}", self.inner.seq.fetch_add(1, Ordering::SeqCst))
    }

    pub fn acked_count(&self) -> u64 {
        self.inner.acked.load(Ordering::SeqCst)
    }

    fn spawn_ack_listener(&self, topic: String, mut ack_rx: mpsc::Receiver<(String, AckAction)>) {
        let queue = self.clone();
        tokio::spawn(async move {
            while let Some((id, action)) = ack_rx.recv().await {
                match action {
                    AckAction::Ack => {
                        queue.inner.acked.fetch_add(1, Ordering::SeqCst);
                    }
                    AckAction::Nack(reason, payload, headers) => {
                        if let Err(e) =
                            redeliver_or_dead_letter(&queue, queue.policy, &topic, &id, &reason, &payload, &headers)
                                .await
                        {
                            error!("Failed to settle nack for {}: {}", id, e);
                        }
                    }
                    AckAction::Reject(reason, payload) => {
                        if let Err(e) = queue.send_to_dlq(&topic, &id, &payload, &reason).await {
                            error!("Failed to dead-letter {}: {}", id, e);
                        } else {
                            warn!("Message {} on {} dead-lettered: {}", id, topic, reason);
                        }
                    }
                }
            }
            debug!("Ack listener for {} stopped", topic);
        });
    }
}

#[async_trait]
impl MqBackend for MemoryQueue {
    async fn publish_with_headers(&self, topic: &str, payload: &[u8], headers: &HashMap<String, String>) -> Result<()> {
        let entry = (self.next_id(), Arc::new(payload.to_vec()), Arc::new(headers.clone()));
        self.channel(topic)
            .tx
            .send(entry)
            .map_err(|_| QueueError::ChannelClosed)?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, sender: mpsc::Sender<Message>) -> Result<()> {
        let channel = self.channel(topic);
        let mut rx = channel
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| QueueError::OperationFailed(format!("topic {topic} already has a subscriber").into()))?;

        let (ack_tx, ack_rx) = mpsc::channel::<(String, AckAction)>(1000);
        self.spawn_ack_listener(topic.to_string(), ack_rx);

        let topic = topic.to_string();
        tokio::spawn(async move {
            while let Some((id, payload, headers)) = rx.recv().await {
                let msg = Message {
                    payload,
                    id,
                    headers,
                    ack_tx: ack_tx.clone(),
                };
                if sender.send(msg).await.is_err() {
                    debug!("Subscriber for {} gone, stopping forwarder", topic);
                    break;
                }
            }
            // Hand the receiver back so a later subscriber can resume.
            *channel.rx.lock().await = Some(rx);
        });
        Ok(())
    }

    async fn send_to_dlq(&self, topic: &str, id: &str, payload: &[u8], reason: &str) -> Result<()> {
        let dead = DeadLetter {
            id: self.next_id(),
            payload: payload.to_vec(),
            reason: reason.to_string(),
            original_id: id.to_string(),
        };
        self.inner.dlq.entry(topic.to_string()).or_default().push(dead);
        Ok(())
    }

    async fn read_dlq(&self, topic: &str, count: usize) -> Result<Vec<DeadLetter>> {
        Ok(self
            .inner
            .dlq
            .get(topic)
            .map(|entries| entries.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }
}
