use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use super::{DataStore, rank_topics};
use crate::common::model::{CrawlResult, NewResult, Task, TaskStatus};
use crate::errors::{Error, Result};

type ResultKey = (Uuid, String, String, String);

/// In-process store. Per-entry locking in `DashMap` gives the same
/// atomicity guarantees as the guarded SQL updates.
#[derive(Default)]
pub struct MemoryStore {
    seq: AtomicU64,
    tasks: DashMap<Uuid, (u64, Task)>,
    results: DashMap<Uuid, (u64, CrawlResult)>,
    result_keys: DashMap<ResultKey, Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    fn latest_matching<F>(&self, filter: F) -> Option<CrawlResult>
    where
        F: Fn(&CrawlResult) -> bool,
    {
        self.results
            .iter()
            .filter(|entry| filter(&entry.value().1))
            .max_by_key(|entry| (entry.value().1.created_at, entry.value().0))
            .map(|entry| entry.value().1.clone())
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        let seq = self.next_seq();
        match self.tasks.entry(task.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(crate::errors::TaskError::TaskAlreadyExists(
                format!("task {} already exists", task.id).into(),
            )
            .into()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert((seq, task.clone()));
                Ok(())
            }
        }
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.get(&id).map(|entry| entry.value().1.clone()))
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus, error: Option<String>) -> Result<bool> {
        let mut entry = self.tasks.get_mut(&id).ok_or_else(|| Error::task_not_found(id))?;
        let task = &mut entry.value_mut().1;
        if !task.status.can_transition_to(status) {
            return Ok(false);
        }
        task.status = status;
        if error.is_some() {
            task.error = error;
        }
        task.updated_at = Utc::now().max(task.created_at);
        Ok(true)
    }

    async fn append_result(&self, task_id: Uuid, result_id: Uuid) -> Result<bool> {
        let mut entry = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| Error::task_not_found(task_id))?;
        let task = &mut entry.value_mut().1;
        if task.result_ids.contains(&result_id) {
            return Ok(false);
        }
        task.result_ids.push(result_id);
        task.updated_at = Utc::now().max(task.created_at);
        Ok(true)
    }

    async fn insert_result_if_absent(&self, result: NewResult) -> Result<CrawlResult> {
        let key = (
            result.task_id,
            result.topic.clone(),
            result.source.clone(),
            result.language.clone(),
        );
        match self.result_keys.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                let id = *existing.get();
                self.results
                    .get(&id)
                    .map(|entry| entry.value().1.clone())
                    .ok_or_else(|| crate::errors::OrmError::NotFound.into())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let stored = result.into_result();
                let seq = self.next_seq();
                self.results.insert(stored.id, (seq, stored.clone()));
                vacant.insert(stored.id);
                Ok(stored)
            }
        }
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<CrawlResult>> {
        Ok(self.results.get(&id).map(|entry| entry.value().1.clone()))
    }

    async fn latest_result(&self, topic: &str, language: &str, source: &str) -> Result<Option<CrawlResult>> {
        Ok(self.latest_matching(|r| r.topic == topic && r.language == language && r.source == source))
    }

    async fn latest_result_for_topic(&self, topic: &str) -> Result<Option<CrawlResult>> {
        Ok(self.latest_matching(|r| r.topic == topic))
    }

    async fn update_result_text(&self, id: Uuid, text: &str) -> Result<bool> {
        match self.results.get_mut(&id) {
            Some(mut entry) => {
                let result = &mut entry.value_mut().1;
                result.text = text.to_string();
                result.updated_at = Utc::now().max(result.created_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn popular_topics(&self, limit: usize, since: DateTime<Utc>) -> Result<Vec<String>> {
        let mut recent: Vec<(DateTime<Utc>, u64, Vec<String>)> = self
            .tasks
            .iter()
            .filter(|entry| entry.value().1.created_at >= since)
            .map(|entry| {
                let (seq, task) = entry.value();
                (task.created_at, *seq, task.topics.clone())
            })
            .collect();
        recent.sort_by_key(|(created_at, seq, _)| (*created_at, *seq));

        let has_result = |topic: &str| self.results.iter().any(|entry| entry.value().1.topic == topic);
        Ok(rank_topics(recent.iter().map(|(_, _, topics)| topics.as_slice()), has_result, limit))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
