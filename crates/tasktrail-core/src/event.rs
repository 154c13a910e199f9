//! Domain event model and post-commit dispatch.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::DomainError;

/// Aggregate types that own an event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    /// The task aggregate.
    Tasks,
    /// The quote aggregate.
    Quotes,
}

impl Stream {
    /// The stream name as stored in the `events.stream` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Quotes => "quotes",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stream {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tasks" => Ok(Self::Tasks),
            "quotes" => Ok(Self::Quotes),
            other => Err(DomainError::Validation(format!("unknown stream: {other}"))),
        }
    }
}

/// The lifecycle event types every aggregate emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// First event of an aggregate, always at version 0.
    Created,
    /// A partial update of the aggregate's state.
    Updated,
    /// The aggregate was removed from its read model.
    Deleted,
}

impl EventKind {
    /// The event name as stored in the `events.event` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            other => Err(DomainError::Validation(format!("unknown event: {other}"))),
        }
    }
}

/// An immutable fact appended to the event store.
///
/// `id` and `event_time` are assigned by the store; `(stream, stream_id,
/// version)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event<D> {
    /// Store-assigned monotonic identifier.
    pub id: u64,
    /// Saga this event belongs to, if any.
    pub saga_id: Option<String>,
    /// Aggregate type.
    pub stream: Stream,
    /// Aggregate instance identifier.
    pub stream_id: String,
    /// Event type.
    pub event: EventKind,
    /// Aggregate-local sequence number, starting at 0.
    pub version: u64,
    /// Store-assigned timestamp.
    pub event_time: DateTime<Utc>,
    /// Trace id of the request that produced the event.
    pub trace_id: String,
    /// Request id of the request that produced the event.
    pub request_id: String,
    /// Event payload.
    pub data: D,
}

/// An event queued on a unit of work, dispatched only after commit.
pub type PendingEvent = Event<serde_json::Value>;

impl<D: Serialize> Event<D> {
    /// Converts the typed event into its dispatchable form.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the payload cannot be serialized.
    pub fn to_pending(&self) -> Result<PendingEvent, DomainError> {
        let data = serde_json::to_value(&self.data).map_err(|e| {
            DomainError::Infrastructure(format!("event serialization failed: {e}"))
        })?;
        Ok(Event {
            id: self.id,
            saga_id: self.saga_id.clone(),
            stream: self.stream,
            stream_id: self.stream_id.clone(),
            event: self.event,
            version: self.version,
            event_time: self.event_time,
            trace_id: self.trace_id.clone(),
            request_id: self.request_id.clone(),
            data,
        })
    }
}

/// Delivers committed events to external consumers.
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    /// Dispatch a single committed event.
    async fn dispatch(&self, event: &PendingEvent) -> Result<(), DomainError>;
}

/// Dispatcher that emits each committed event as a structured log record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventDispatcher;

#[async_trait]
impl EventDispatcher for TracingEventDispatcher {
    async fn dispatch(&self, event: &PendingEvent) -> Result<(), DomainError> {
        info!(
            event_id = event.id,
            stream = %event.stream,
            stream_id = %event.stream_id,
            event = %event.event,
            version = event.version,
            saga_id = ?event.saga_id,
            trace_id = %event.trace_id,
            request_id = %event.request_id,
            "event committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_and_event_kind_parse_their_column_values() {
        assert_eq!("tasks".parse::<Stream>().unwrap(), Stream::Tasks);
        assert_eq!("quotes".parse::<Stream>().unwrap(), Stream::Quotes);
        assert_eq!("deleted".parse::<EventKind>().unwrap(), EventKind::Deleted);
        assert!(matches!(
            "todos".parse::<Stream>(),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn test_to_pending_preserves_metadata_and_serializes_payload() {
        let event = Event {
            id: 7,
            saga_id: Some("saga-1".to_owned()),
            stream: Stream::Tasks,
            stream_id: "task-1".to_owned(),
            event: EventKind::Updated,
            version: 2,
            event_time: Utc::now(),
            trace_id: "t".repeat(32),
            request_id: "r".repeat(16),
            data: serde_json::json!({ "title": "new" }),
        };

        let pending = event.to_pending().unwrap();

        assert_eq!(pending, event);
    }
}
