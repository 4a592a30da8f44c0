use async_trait::async_trait;
use log::{debug, error, info, warn};
use metrics::counter;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{DeadLetter, Message, MqBackend};
use crate::common::model::JobMessage;
use crate::errors::{QueueError, Result};

/// Processes one decoded job. A retryable error nacks the message, any other
/// error rejects it to the dead-letter topic.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: JobMessage) -> Result<()>;
}

/// Typed job queue over a message backend.
#[derive(Clone)]
pub struct TaskQueue {
    backend: Arc<dyn MqBackend>,
    topic: String,
    capacity: usize,
}

impl TaskQueue {
    pub fn new(backend: Arc<dyn MqBackend>, topic: impl Into<String>, capacity: usize) -> Self {
        Self {
            backend,
            topic: topic.into(),
            capacity: capacity.max(1),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn backend(&self) -> Arc<dyn MqBackend> {
        self.backend.clone()
    }

    pub async fn publish(&self, job: &JobMessage) -> Result<()> {
        let payload = serde_json::to_vec(job).map_err(|e| QueueError::SerializationFailed(Box::new(e)))?;
        self.backend.publish(&self.topic, &payload).await?;
        debug!("Published job {} to {}", job.task_id, self.topic);
        Ok(())
    }

    /// Delivers jobs to `handler` one at a time until `shutdown` fires.
    pub async fn consume(&self, handler: Arc<dyn JobHandler>, shutdown: CancellationToken) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<Message>(self.capacity);
        self.backend.subscribe(&self.topic, tx).await?;
        info!("Consuming jobs from {}", self.topic);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping consumer for {}", self.topic);
                    break;
                }
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        warn!("Delivery channel for {} closed", self.topic);
                        break;
                    };
                    self.process(handler.as_ref(), msg).await;
                }
            }
        }
        Ok(())
    }

    async fn process(&self, handler: &dyn JobHandler, msg: Message) {
        let job: JobMessage = match serde_json::from_slice(&msg.payload) {
            Ok(job) => job,
            Err(e) => {
                warn!("Undecodable job {} on {}: {}", msg.id, self.topic, e);
                counter!("worker_jobs_total", "outcome" => "poison").increment(1);
                if let Err(e) = msg.reject(format!("poison: {e}")).await {
                    error!("Failed to reject {}: {}", msg.id, e);
                }
                return;
            }
        };

        let task_id = job.task_id;
        let settled = match handler.handle(job).await {
            Ok(()) => {
                counter!("worker_jobs_total", "outcome" => "completed").increment(1);
                msg.ack().await
            }
            Err(e) if e.is_retryable() => {
                warn!("Job {} failed, will retry: {}", task_id, e);
                counter!("worker_jobs_total", "outcome" => "retry").increment(1);
                msg.nack(e.to_string()).await
            }
            Err(e) => {
                error!("Job {} failed permanently: {}", task_id, e);
                counter!("worker_jobs_total", "outcome" => "failed").increment(1);
                msg.reject(e.to_string()).await
            }
        };
        if let Err(e) = settled {
            error!("Failed to settle message {}: {}", msg.id, e);
        }
    }

    pub async fn dead_letters(&self, count: usize) -> Result<Vec<DeadLetter>> {
        self.backend.read_dlq(&self.topic, count).await
    }
}
