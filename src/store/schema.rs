use sea_orm::{ConnectionTrait, DatabaseConnection};

use crate::errors::{OrmError, Result};

/// Idempotent DDL for the task and result tables and their indexes.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS tasks (
        id UUID PRIMARY KEY,
        input TEXT NOT NULL,
        topics TEXT[] NOT NULL DEFAULT '{}',
        sources TEXT[] NOT NULL DEFAULT '{}',
        language TEXT NOT NULL,
        status TEXT NOT NULL,
        result_ids UUID[] NOT NULL DEFAULT '{}',
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        error TEXT,
        schema_version SMALLINT NOT NULL DEFAULT 1
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_topics ON tasks USING GIN (topics)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks (created_at)",
    r#"CREATE TABLE IF NOT EXISTS results (
        id UUID PRIMARY KEY,
        task_id UUID NOT NULL,
        topic TEXT NOT NULL,
        source TEXT NOT NULL,
        language TEXT NOT NULL,
        text TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_results_task_topic_source ON results (task_id, topic, source, language)",
    "CREATE INDEX IF NOT EXISTS idx_results_task_id ON results (task_id)",
    "CREATE INDEX IF NOT EXISTS idx_results_lookup ON results (topic, language, source, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_results_created_at ON results (created_at)",
];

pub async fn ensure_schema(db: &DatabaseConnection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        db.execute_unprepared(statement)
            .await
            .map_err(|e| OrmError::QueryExecutionError(e.to_string().into()))?;
    }
    log::info!("Schema bootstrap finished ({} statements)", SCHEMA_STATEMENTS.len());
    Ok(())
}
