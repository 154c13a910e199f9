//! Appending to the `events` table.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{PgConnection, Row};
use tasktrail_core::error::DomainError;
use tasktrail_core::event::{Event, EventKind, Stream};
use tasktrail_core::unit_of_work::UnitOfWork;

use crate::error::{database_error, is_unique_violation, to_db_version};

const INSERT_EVENT: &str = r"
INSERT INTO events (saga_id, stream, stream_id, version, event, data, trace_id, request_id)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
RETURNING id, event_time
";

/// What to append; the store assigns `id` and `event_time`.
pub(crate) struct NewEvent<'a, D> {
    pub saga_id: Option<&'a str>,
    pub stream: Stream,
    pub stream_id: &'a str,
    pub event: EventKind,
    pub version: u64,
    pub data: D,
}

/// Inserts one event on `conn`, stamped with the unit of work's trace.
///
/// A duplicate `(stream, stream_id, version)` is a `ConcurrencyConflict`.
pub(crate) async fn append<D: Serialize + Send + Sync>(
    conn: &mut PgConnection,
    uow: &UnitOfWork,
    new: NewEvent<'_, D>,
) -> Result<Event<D>, DomainError> {
    let trace = uow.trace_info();
    let version = to_db_version(new.version)?;

    let row = sqlx::query(INSERT_EVENT)
        .bind(new.saga_id)
        .bind(new.stream.as_str())
        .bind(new.stream_id)
        .bind(version)
        .bind(new.event.as_str())
        .bind(Json(&new.data))
        .bind(&trace.trace_id)
        .bind(&trace.request_id)
        .fetch_one(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DomainError::ConcurrencyConflict {
                    stream: new.stream.to_string(),
                    stream_id: new.stream_id.to_owned(),
                    version: new.version,
                }
            } else {
                database_error("append event", &e)
            }
        })?;

    let id: i64 = row.try_get("id").map_err(|e| database_error("append event", &e))?;
    let event_time: DateTime<Utc> = row
        .try_get("event_time")
        .map_err(|e| database_error("append event", &e))?;

    Ok(Event {
        id: u64::try_from(id)
            .map_err(|_| DomainError::Infrastructure(format!("negative event id {id}")))?,
        saga_id: new.saga_id.map(str::to_owned),
        stream: new.stream,
        stream_id: new.stream_id.to_owned(),
        event: new.event,
        version: new.version,
        event_time,
        trace_id: trace.trace_id.clone(),
        request_id: trace.request_id.clone(),
        data: new.data,
    })
}

/// Rejects updates and deletes that would not follow a `created` event.
pub(crate) fn require_successor(
    stream: Stream,
    stream_id: &str,
    expected_version: u64,
) -> Result<(), DomainError> {
    if expected_version == 0 {
        return Err(DomainError::Validation(format!(
            "{stream} {stream_id}: version 0 is reserved for the created event"
        )));
    }
    Ok(())
}

/// Guard used when a read-model row is missing or already moved on.
pub(crate) fn conflict(stream: Stream, stream_id: &str, version: u64) -> DomainError {
    DomainError::ConcurrencyConflict {
        stream: stream.to_string(),
        stream_id: stream_id.to_owned(),
        version,
    }
}
