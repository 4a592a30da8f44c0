use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content fetched for one (topic, source, language) on behalf of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlResult {
    pub id: Uuid,
    pub task_id: Uuid,
    pub topic: String,
    pub source: String,
    pub language: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResult {
    pub task_id: Uuid,
    pub topic: String,
    pub source: String,
    pub language: String,
    pub text: String,
}

impl NewResult {
    pub fn into_result(self) -> CrawlResult {
        let now = Utc::now();
        CrawlResult {
            id: Uuid::new_v4(),
            task_id: self.task_id,
            topic: self.topic,
            source: self.source,
            language: self.language,
            text: self.text,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Value stored in the hot cache under a (topic, language) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSnapshot {
    pub result_id: Uuid,
    pub task_id: Uuid,
    pub topic: String,
    pub source: String,
    pub language: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl From<&CrawlResult> for ResultSnapshot {
    fn from(result: &CrawlResult) -> Self {
        Self {
            result_id: result.id,
            task_id: result.task_id,
            topic: result.topic.clone(),
            source: result.source.clone(),
            language: result.language.clone(),
            text: result.text.clone(),
            created_at: result.created_at,
        }
    }
}
