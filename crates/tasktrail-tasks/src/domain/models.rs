//! Task read model and event payload.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tasktrail_core::error::DomainError;
use tasktrail_core::event::Event;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not started.
    Pending,
    /// Being worked on.
    Progress,
    /// Done.
    Completed,
}

impl TaskStatus {
    /// The value stored in the `tasks.status` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Progress => "progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "progress" => Ok(Self::Progress),
            "completed" => Ok(Self::Completed),
            other => Err(DomainError::Validation(format!("unknown task status: {other}"))),
        }
    }
}

/// Event payload and partial update: only the fields that are `Some` change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_map: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl TaskData {
    /// Returns `true` if no field would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.random_map.is_none()
            && self.metadata.is_none()
    }
}

/// A row of the `tasks` read model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub random_map: HashMap<String, String>,
    pub metadata: Map<String, Value>,
    /// Version of the last event applied to this row.
    pub version: u64,
    pub date_time_created: DateTime<Utc>,
    pub date_time_updated: DateTime<Utc>,
}

/// An event on the `tasks` stream.
pub type TaskEvent = Event<TaskData>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_data_serializes_only_present_fields() {
        let data = TaskData {
            status: Some(TaskStatus::Progress),
            ..TaskData::default()
        };

        let json = serde_json::to_value(&data).unwrap();

        assert_eq!(json, serde_json::json!({ "status": "progress" }));
        assert!(!data.is_empty());
        assert!(TaskData::default().is_empty());
    }

    #[test]
    fn test_status_parses_column_values() {
        assert_eq!("progress".parse::<TaskStatus>().unwrap(), TaskStatus::Progress);
        assert!("done".parse::<TaskStatus>().is_err());
    }
}
