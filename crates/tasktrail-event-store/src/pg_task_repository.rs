//! `PostgreSQL` implementation of the `TaskRepository` trait.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tasktrail_core::error::DomainError;
use tasktrail_core::event::{EventKind, Stream};
use tasktrail_core::unit_of_work::UnitOfWork;
use tasktrail_tasks::domain::models::{Task, TaskData, TaskEvent, TaskStatus};
use tasktrail_tasks::domain::repository::TaskRepository;
use tracing::{Instrument, debug};

use crate::error::{database_error, from_db_version, page_bounds, to_db_version};
use crate::events::{NewEvent, append, conflict, require_successor};
use crate::pg_transaction::relational_transaction;

const SELECT_TASK: &str = r"
SELECT id, title, description, status, random_map, metadata, version,
       date_time_created, date_time_updated
FROM tasks
";

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: String,
    title: String,
    description: String,
    status: String,
    random_map: Json<HashMap<String, String>>,
    metadata: Json<Map<String, Value>>,
    version: i64,
    date_time_created: DateTime<Utc>,
    date_time_updated: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status: TaskStatus = row
            .status
            .parse()
            .map_err(|e| DomainError::Infrastructure(format!("task {}: {e}", row.id)))?;
        Ok(Self {
            status,
            version: from_db_version(row.version)?,
            id: row.id,
            title: row.title,
            description: row.description,
            random_map: row.random_map.0,
            metadata: row.metadata.0,
            date_time_created: row.date_time_created,
            date_time_updated: row.date_time_updated,
        })
    }
}

/// PostgreSQL-backed task repository.
#[derive(Debug, Clone)]
pub struct PgTaskRepository {
    pool: PgPool,
}

impl PgTaskRepository {
    /// Creates a new `PgTaskRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends a non-initial event, then updates or deletes the row still at
    /// `expected_version - 1`.
    async fn advance(
        &self,
        uow: &UnitOfWork,
        id: &str,
        saga_id: Option<&str>,
        expected_version: u64,
        kind: EventKind,
        data: TaskData,
    ) -> Result<TaskEvent, DomainError> {
        require_successor(Stream::Tasks, id, expected_version)?;
        let new_version = to_db_version(expected_version)?;

        let tx = relational_transaction(uow, &self.pool).await?;
        let mut guard = tx.lock().await?;

        let event = append(
            &mut **guard,
            uow,
            NewEvent {
                saga_id,
                stream: Stream::Tasks,
                stream_id: id,
                event: kind,
                version: expected_version,
                data,
            },
        )
        .await?;

        let mut query = match kind {
            EventKind::Deleted => QueryBuilder::<Postgres>::new("DELETE FROM tasks"),
            EventKind::Created | EventKind::Updated => {
                let mut query = QueryBuilder::<Postgres>::new("UPDATE tasks SET version = ");
                query.push_bind(new_version);
                query.push(", date_time_updated = ");
                query.push_bind(event.event_time);
                push_changes(&mut query, &event.data);
                query
            }
        };
        query.push(" WHERE id = ");
        query.push_bind(id);
        query.push(" AND version = ");
        query.push_bind(new_version - 1);
        query.push(" RETURNING id");

        let touched: Option<String> = query
            .build_query_scalar()
            .fetch_optional(&mut **guard)
            .await
            .map_err(|e| database_error("advance task", &e))?;
        drop(guard);

        if touched.is_none() {
            return Err(conflict(Stream::Tasks, id, expected_version));
        }

        uow.register_event(event.to_pending()?);
        debug!(task_id = %id, version = expected_version, event = %kind, "task event appended");
        Ok(event)
    }
}

fn push_changes(query: &mut QueryBuilder<'_, Postgres>, data: &TaskData) {
    if let Some(title) = &data.title {
        query.push(", title = ");
        query.push_bind(title.clone());
    }
    if let Some(description) = &data.description {
        query.push(", description = ");
        query.push_bind(description.clone());
    }
    if let Some(status) = data.status {
        query.push(", status = ");
        query.push_bind(status.as_str());
    }
    if let Some(random_map) = &data.random_map {
        query.push(", random_map = ");
        query.push_bind(Json(random_map.clone()));
    }
    if let Some(metadata) = &data.metadata {
        query.push(", metadata = ");
        query.push_bind(Json(metadata.clone()));
    }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn create(
        &self,
        uow: &UnitOfWork,
        id: &str,
        saga_id: Option<&str>,
        data: TaskData,
    ) -> Result<TaskEvent, DomainError> {
        async {
            let tx = relational_transaction(uow, &self.pool).await?;
            let mut guard = tx.lock().await?;

            let event = append(
                &mut **guard,
                uow,
                NewEvent {
                    saga_id,
                    stream: Stream::Tasks,
                    stream_id: id,
                    event: EventKind::Created,
                    version: 0,
                    data,
                },
            )
            .await?;

            let data = &event.data;
            let row: TaskRow = sqlx::query_as(
                r"
                INSERT INTO tasks (id, title, description, status, random_map, metadata,
                                   version, date_time_created, date_time_updated)
                VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $7)
                RETURNING id, title, description, status, random_map, metadata, version,
                          date_time_created, date_time_updated
                ",
            )
            .bind(id)
            .bind(data.title.as_deref().unwrap_or_default())
            .bind(data.description.as_deref().unwrap_or_default())
            .bind(data.status.unwrap_or(TaskStatus::Pending).as_str())
            .bind(Json(data.random_map.clone().unwrap_or_default()))
            .bind(Json(data.metadata.clone().unwrap_or_default()))
            .bind(event.event_time)
            .fetch_one(&mut **guard)
            .await
            .map_err(|e| database_error("insert task", &e))?;
            drop(guard);
            let task = Task::try_from(row)?;

            uow.register_event(event.to_pending()?);
            debug!(
                task_id = %task.id,
                status = %task.status,
                version = task.version,
                "task created"
            );
            Ok(event)
        }
        .instrument(uow.span())
        .await
    }

    async fn get(&self, uow: &UnitOfWork, id: &str) -> Result<Task, DomainError> {
        async {
            let row: Option<TaskRow> = sqlx::query_as(&format!("{SELECT_TASK} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| database_error("get task", &e))?;

            row.ok_or_else(|| DomainError::NotFound {
                stream: Stream::Tasks.to_string(),
                id: id.to_owned(),
            })?
            .try_into()
        }
        .instrument(uow.span())
        .await
    }

    async fn list(
        &self,
        uow: &UnitOfWork,
        count_per_page: u32,
        page_number: u32,
    ) -> Result<Vec<Task>, DomainError> {
        async {
            let (limit, offset) = page_bounds(count_per_page, page_number)?;
            let rows: Vec<TaskRow> = sqlx::query_as(&format!(
                "{SELECT_TASK} ORDER BY date_time_created, id LIMIT $1 OFFSET $2"
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| database_error("list tasks", &e))?;

            rows.into_iter().map(Task::try_from).collect()
        }
        .instrument(uow.span())
        .await
    }

    async fn update(
        &self,
        uow: &UnitOfWork,
        id: &str,
        saga_id: Option<&str>,
        expected_version: u64,
        data: TaskData,
    ) -> Result<TaskEvent, DomainError> {
        if data.is_empty() {
            return Err(DomainError::Validation(format!(
                "update of task {id} changes nothing"
            )));
        }
        self.advance(uow, id, saga_id, expected_version, EventKind::Updated, data)
            .instrument(uow.span())
            .await
    }

    async fn delete(
        &self,
        uow: &UnitOfWork,
        id: &str,
        saga_id: Option<&str>,
        expected_version: u64,
    ) -> Result<TaskEvent, DomainError> {
        self.advance(
            uow,
            id,
            saga_id,
            expected_version,
            EventKind::Deleted,
            TaskData::default(),
        )
        .instrument(uow.span())
        .await
    }
}
