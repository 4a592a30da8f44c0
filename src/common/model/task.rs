use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::{TaskError, Error};

/// Version of the persisted task/result schema.
pub const SCHEMA_VERSION: u16 = 1;

/// Lifecycle of a crawl task.
///
/// `Pending -> InProgress -> {Completed, Failed}`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether a status update from `self` to `next` may be applied.
    ///
    /// Same-state updates are allowed for non-terminal states so that a
    /// redelivered job can re-enter `InProgress` without error.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Pending) => true,
            (Pending, InProgress) => true,
            (InProgress, InProgress) | (InProgress, Completed) | (InProgress, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(TaskError::InvalidTransition(format!("unknown status {other}")).into()),
        }
    }
}

/// Request-scoped knobs carried through the pipeline without interpretation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Durable record of one crawl request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub input: String,
    pub topics: Vec<String>,
    pub sources: Vec<String>,
    pub language: String,
    pub status: TaskStatus,
    pub result_ids: Vec<Uuid>,
    #[serde(default)]
    pub metadata: PipelineMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
}

fn default_schema_version() -> u16 {
    SCHEMA_VERSION
}

impl Task {
    pub fn new(
        input: impl Into<String>,
        topics: Vec<String>,
        sources: Vec<String>,
        language: impl Into<String>,
        metadata: PipelineMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            input: input.into(),
            topics,
            sources,
            language: language.into(),
            status: TaskStatus::Pending,
            result_ids: Vec::new(),
            metadata,
            created_at: now,
            updated_at: now,
            error: None,
            schema_version: SCHEMA_VERSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    const ALL: [TaskStatus; 4] = [Pending, InProgress, Completed, Failed];

    #[test]
    fn test_terminal_states_are_final() {
        for from in [Completed, Failed] {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn test_forward_transitions() {
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(InProgress.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(serde_json::to_string(&InProgress).unwrap(), "\"in_progress\"");
        for status in ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new(
            "Photosynthesis",
            vec!["Photosynthesis".into()],
            vec!["wikipedia".into()],
            "en",
            PipelineMetadata::default(),
        );
        assert_eq!(task.status, Pending);
        assert!(task.result_ids.is_empty());
        assert_eq!(task.created_at, task.updated_at);
        assert_eq!(task.schema_version, SCHEMA_VERSION);
    }
}
