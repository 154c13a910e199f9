//! Persistence contract for tasks.

use async_trait::async_trait;
use tasktrail_core::error::DomainError;
use tasktrail_core::unit_of_work::UnitOfWork;

use super::models::{Task, TaskData, TaskEvent};

/// Event-sourced task repository.
///
/// Writes append an event and update the `tasks` read model in the unit of
/// work's relational transaction. Reads see only committed rows.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Appends the `created` event at version 0 and inserts the row.
    async fn create(
        &self,
        uow: &UnitOfWork,
        id: &str,
        saga_id: Option<&str>,
        data: TaskData,
    ) -> Result<TaskEvent, DomainError>;

    /// Loads one task. `NotFound` if absent.
    async fn get(&self, uow: &UnitOfWork, id: &str) -> Result<Task, DomainError>;

    /// Loads one page of tasks, oldest first. Pages start at 0.
    async fn list(
        &self,
        uow: &UnitOfWork,
        count_per_page: u32,
        page_number: u32,
    ) -> Result<Vec<Task>, DomainError>;

    /// Appends an `updated` event at `expected_version` and applies the
    /// fields present in `data` to a row at `expected_version - 1`.
    /// `ConcurrencyConflict` if the row has moved on.
    async fn update(
        &self,
        uow: &UnitOfWork,
        id: &str,
        saga_id: Option<&str>,
        expected_version: u64,
        data: TaskData,
    ) -> Result<TaskEvent, DomainError>;

    /// Appends a `deleted` event at `expected_version` and removes the row,
    /// with the same guard as `update`.
    async fn delete(
        &self,
        uow: &UnitOfWork,
        id: &str,
        saga_id: Option<&str>,
        expected_version: u64,
    ) -> Result<TaskEvent, DomainError>;
}
