//! Durable storage for tasks and results.
//!
//! [`DataStore`] is the only way the rest of the crate touches persisted
//! state. Two implementations are provided: [`PostgresStore`] for
//! deployments and [`MemoryStore`] for single-node runs and tests.

pub mod entity;
mod memory;
mod postgres;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::common::model::{CrawlResult, NewResult, Task, TaskStatus};
use crate::errors::Result;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn create_task(&self, task: &Task) -> Result<()>;

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>>;

    /// Moves the task to `status` if the transition is legal.
    ///
    /// Returns `Ok(false)` when the update was refused (terminal or illegal
    /// transition). `error` is stored when present and kept otherwise.
    async fn update_status(&self, id: Uuid, status: TaskStatus, error: Option<String>) -> Result<bool>;

    /// Atomic set-add of `result_id` to the task's result list.
    ///
    /// Returns `Ok(false)` if the id was already present.
    async fn append_result(&self, task_id: Uuid, result_id: Uuid) -> Result<bool>;

    /// Inserts unless a result for the same (task, topic, source, language)
    /// exists, and returns whichever row is stored.
    async fn insert_result_if_absent(&self, result: NewResult) -> Result<CrawlResult>;

    async fn get_result(&self, id: Uuid) -> Result<Option<CrawlResult>>;

    async fn latest_result(&self, topic: &str, language: &str, source: &str) -> Result<Option<CrawlResult>>;

    async fn latest_result_for_topic(&self, topic: &str) -> Result<Option<CrawlResult>>;

    async fn update_result_text(&self, id: Uuid, text: &str) -> Result<bool>;

    /// Topics of tasks created at or after `since`, most requested first.
    ///
    /// Ties keep first-seen order. Topics without any stored result are
    /// skipped.
    async fn popular_topics(&self, limit: usize, since: DateTime<Utc>) -> Result<Vec<String>>;

    async fn ping(&self) -> Result<()>;

    /// Releases the connections held by the store.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Statuses from which a move to `target` is legal.
pub(crate) fn allowed_predecessors(target: TaskStatus) -> Vec<TaskStatus> {
    [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ]
    .into_iter()
    .filter(|from| from.can_transition_to(target))
    .collect()
}

/// Counts topic occurrences in `(created_at, topics)` order and ranks them.
pub(crate) fn rank_topics<'a, I, F>(tasks: I, has_result: F, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a [String]>,
    F: Fn(&str) -> bool,
{
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut index: std::collections::HashMap<&'a str, usize> = std::collections::HashMap::new();
    for topics in tasks {
        for topic in topics {
            match index.get(topic.as_str()) {
                Some(&i) => counts[i].1 += 1,
                None => {
                    index.insert(topic.as_str(), counts.len());
                    counts.push((topic.clone(), 1));
                }
            }
        }
    }
    counts.retain(|(topic, _)| has_result(topic));
    // stable: equal counts stay in first-seen order
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(limit).map(|(topic, _)| topic).collect()
}
