use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{PipelineMetadata, Task};

/// Queue envelope: `{"taskId": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub task_id: Uuid,
    pub data: JobData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobData {
    pub topics: Vec<String>,
    pub sources: Vec<String>,
    pub language: String,
    #[serde(flatten)]
    pub metadata: PipelineMetadata,
}

impl From<&Task> for JobMessage {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            data: JobData {
                topics: task.topics.clone(),
                sources: task.sources.clone(),
                language: task.language.clone(),
                metadata: task.metadata.clone(),
            },
        }
    }
}

/// Submission payload accepted by the crawl service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub topic: String,
    pub sources: Vec<String>,
    pub language: String,
    #[serde(flatten)]
    pub metadata: PipelineMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreated {
    pub task_id: Uuid,
    pub extracted_topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub task_id: Uuid,
    pub status: super::task::TaskStatus,
    pub result_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultView {
    pub result_id: Uuid,
    pub topic: String,
    pub source: String,
    pub language: String,
    pub text: String,
}
