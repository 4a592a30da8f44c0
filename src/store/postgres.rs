use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait,
    FromQueryResult, QueryFilter, QueryOrder, Statement,
};
use std::sync::Arc;
use uuid::Uuid;

use super::entity::*;
use super::{DataStore, allowed_predecessors, schema};
use crate::common::model::config::DatabaseConfig;
use crate::common::model::{CrawlResult, NewResult, PipelineMetadata, Task, TaskStatus};
use crate::errors::{Error, OrmError, Result, TaskError};
use crate::utils::connector::db_connection;
use crate::utils::txn::{begin_read, begin_write};

const UPDATE_STATUS_SQL: &str = r#"
UPDATE tasks
SET status = $2, error = COALESCE($3, error), updated_at = GREATEST($4, created_at)
WHERE id = $1 AND status = ANY($5)
"#;

const APPEND_RESULT_SQL: &str = r#"
UPDATE tasks
SET result_ids = array_append(result_ids, $2), updated_at = GREATEST($3, created_at)
WHERE id = $1 AND NOT ($2 = ANY(result_ids))
"#;

const INSERT_RESULT_SQL: &str = r#"
INSERT INTO results (id, task_id, topic, source, language, text, created_at, updated_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
ON CONFLICT (task_id, topic, source, language) DO NOTHING
"#;

const POPULAR_TOPICS_SQL: &str = r#"
WITH recent AS (
    SELECT t.topic, t.ord, tk.created_at
    FROM tasks tk
    CROSS JOIN LATERAL unnest(tk.topics) WITH ORDINALITY AS t(topic, ord)
    WHERE tk.created_at >= $1
),
ranked AS (
    SELECT topic,
           COUNT(*) AS hits,
           MIN(created_at) AS first_seen,
           (array_agg(ord ORDER BY created_at, ord))[1] AS first_ord
    FROM recent
    GROUP BY topic
)
SELECT topic FROM ranked
WHERE EXISTS (SELECT 1 FROM results r WHERE r.topic = ranked.topic)
ORDER BY hits DESC, first_seen ASC, first_ord ASC, topic ASC
LIMIT $2
"#;

#[derive(Debug, FromQueryResult)]
struct TopicRow {
    topic: String,
}

fn map_db_err(e: DbErr) -> Error {
    match e {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => OrmError::ConnectionError(e.to_string().into()).into(),
        _ => OrmError::QueryExecutionError(e.to_string().into()).into(),
    }
}

fn task_from_model(model: TaskModel) -> Result<Task> {
    let status = model
        .status
        .parse::<TaskStatus>()
        .map_err(|_| OrmError::InvalidData(format!("task {} has status {}", model.id, model.status)))?;
    let metadata: PipelineMetadata = serde_json::from_value(model.metadata)
        .map_err(|e| OrmError::InvalidData(format!("task {} metadata: {e}", model.id)))?;
    Ok(Task {
        id: model.id,
        input: model.input,
        topics: model.topics,
        sources: model.sources,
        language: model.language,
        status,
        result_ids: model.result_ids,
        metadata,
        created_at: model.created_at,
        updated_at: model.updated_at,
        error: model.error,
        schema_version: model.schema_version as u16,
    })
}

fn result_from_model(model: ResultModel) -> CrawlResult {
    CrawlResult {
        id: model.id,
        task_id: model.task_id,
        topic: model.topic,
        source: model.source,
        language: model.language,
        text: model.text,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

/// sea-orm backed store. Every mutation is a single guarded statement, so
/// concurrent workers cannot lose updates or duplicate result ids.
pub struct PostgresStore {
    db: Arc<DatabaseConnection>,
}

impl PostgresStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db: Arc::new(db) }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let db = db_connection(config)
            .await
            .ok_or_else(|| OrmError::ConnectionError("database unreachable or url missing".into()))?;
        if config.bootstrap_schema {
            schema::ensure_schema(&db).await?;
        }
        Ok(Self::new(db))
    }

    async fn task_exists(&self, id: Uuid) -> Result<bool> {
        Ok(TaskEntity::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(map_db_err)?
            .is_some())
    }

    fn statement(sql: &str, values: Vec<sea_orm::Value>) -> Statement {
        Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
    }
}

#[async_trait]
impl DataStore for PostgresStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        let metadata = serde_json::to_value(&task.metadata)
            .map_err(|e| OrmError::InvalidData(e.to_string()))?;
        let active = TaskActiveModel {
            id: Set(task.id),
            input: Set(task.input.clone()),
            topics: Set(task.topics.clone()),
            sources: Set(task.sources.clone()),
            language: Set(task.language.clone()),
            status: Set(task.status.as_str().to_string()),
            result_ids: Set(task.result_ids.clone()),
            metadata: Set(metadata),
            created_at: Set(task.created_at),
            updated_at: Set(task.updated_at),
            error: Set(task.error.clone()),
            schema_version: Set(task.schema_version as i16),
        };
        TaskEntity::insert(active).exec(self.db.as_ref()).await.map_err(|e| {
            if e.to_string().contains("duplicate key") {
                TaskError::TaskAlreadyExists(format!("task {} already exists", task.id).into()).into()
            } else {
                map_db_err(e)
            }
        })?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let txn = begin_read(&self.db)
            .await
            .map_err(|e| OrmError::ConnectionError(e.to_string().into()))?;
        let model = TaskEntity::find_by_id(id).one(&txn).await.map_err(map_db_err)?;
        txn.commit()
            .await
            .map_err(|e| OrmError::TransactionError(e.to_string().into()))?;
        model.map(task_from_model).transpose()
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus, error: Option<String>) -> Result<bool> {
        let predecessors: Vec<String> = allowed_predecessors(status)
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let stmt = Self::statement(
            UPDATE_STATUS_SQL,
            vec![
                id.into(),
                status.as_str().into(),
                error.into(),
                Utc::now().into(),
                predecessors.into(),
            ],
        );
        let affected = self.db.execute(stmt).await.map_err(map_db_err)?.rows_affected();
        if affected > 0 {
            return Ok(true);
        }
        if self.task_exists(id).await? {
            Ok(false)
        } else {
            Err(Error::task_not_found(id))
        }
    }

    async fn append_result(&self, task_id: Uuid, result_id: Uuid) -> Result<bool> {
        let stmt = Self::statement(
            APPEND_RESULT_SQL,
            vec![task_id.into(), result_id.into(), Utc::now().into()],
        );
        let affected = self.db.execute(stmt).await.map_err(map_db_err)?.rows_affected();
        if affected > 0 {
            return Ok(true);
        }
        if self.task_exists(task_id).await? {
            Ok(false)
        } else {
            Err(Error::task_not_found(task_id))
        }
    }

    async fn insert_result_if_absent(&self, result: NewResult) -> Result<CrawlResult> {
        let candidate = result.into_result();
        let txn = begin_write(&self.db)
            .await
            .map_err(|e| OrmError::ConnectionError(e.to_string().into()))?;

        let stmt = Self::statement(
            INSERT_RESULT_SQL,
            vec![
                candidate.id.into(),
                candidate.task_id.into(),
                candidate.topic.clone().into(),
                candidate.source.clone().into(),
                candidate.language.clone().into(),
                candidate.text.clone().into(),
                candidate.created_at.into(),
                candidate.updated_at.into(),
            ],
        );
        txn.execute(stmt).await.map_err(map_db_err)?;

        let stored = ResultEntity::find()
            .filter(ResultColumn::TaskId.eq(candidate.task_id))
            .filter(ResultColumn::Topic.eq(candidate.topic.as_str()))
            .filter(ResultColumn::Source.eq(candidate.source.as_str()))
            .filter(ResultColumn::Language.eq(candidate.language.as_str()))
            .one(&txn)
            .await
            .map_err(map_db_err)?
            .ok_or(OrmError::NotFound)?;

        txn.commit()
            .await
            .map_err(|e| OrmError::TransactionError(e.to_string().into()))?;
        Ok(result_from_model(stored))
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<CrawlResult>> {
        Ok(ResultEntity::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(map_db_err)?
            .map(result_from_model))
    }

    async fn latest_result(&self, topic: &str, language: &str, source: &str) -> Result<Option<CrawlResult>> {
        Ok(ResultEntity::find()
            .filter(ResultColumn::Topic.eq(topic))
            .filter(ResultColumn::Language.eq(language))
            .filter(ResultColumn::Source.eq(source))
            .order_by_desc(ResultColumn::CreatedAt)
            .one(self.db.as_ref())
            .await
            .map_err(map_db_err)?
            .map(result_from_model))
    }

    async fn latest_result_for_topic(&self, topic: &str) -> Result<Option<CrawlResult>> {
        Ok(ResultEntity::find()
            .filter(ResultColumn::Topic.eq(topic))
            .order_by_desc(ResultColumn::CreatedAt)
            .one(self.db.as_ref())
            .await
            .map_err(map_db_err)?
            .map(result_from_model))
    }

    async fn update_result_text(&self, id: Uuid, text: &str) -> Result<bool> {
        let outcome = ResultEntity::update_many()
            .col_expr(ResultColumn::Text, Expr::value(text))
            .col_expr(ResultColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(ResultColumn::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(map_db_err)?;
        Ok(outcome.rows_affected > 0)
    }

    async fn popular_topics(&self, limit: usize, since: DateTime<Utc>) -> Result<Vec<String>> {
        let rows = TopicRow::find_by_statement(Self::statement(
            POPULAR_TOPICS_SQL,
            vec![since.into(), (limit as i64).into()],
        ))
        .all(self.db.as_ref())
        .await
        .map_err(map_db_err)?;
        Ok(rows.into_iter().map(|row| row.topic).collect())
    }

    async fn ping(&self) -> Result<()> {
        self.db.ping().await.map_err(map_db_err)
    }

    async fn close(&self) -> Result<()> {
        // Clones share one sqlx pool, closing any of them closes it.
        self.db.as_ref().clone().close().await.map_err(map_db_err)
    }
}
