//! Command handlers for the task context.
//!
//! Each handler checks access, loads the current row and appends the next
//! event. Handlers never settle the unit of work; the caller commits or rolls
//! back based on the returned result.

use tasktrail_core::acl::{AclRepository, Permissions, Principal, UserType};
use tasktrail_core::command::Command;
use tasktrail_core::error::DomainError;
use tasktrail_core::event::Stream;
use tasktrail_core::id::IdGenerator;
use tasktrail_core::unit_of_work::UnitOfWork;
use tracing::debug;

use crate::domain::commands::{CompleteTask, CreateTask, DeleteTask, ProgressTask, UpdateTask};
use crate::domain::models::{Task, TaskData, TaskEvent, TaskStatus};
use crate::domain::repository::TaskRepository;

/// Loads a task after checking the principal may write it.
async fn load_writable(
    uow: &UnitOfWork,
    repo: &dyn TaskRepository,
    acl: &dyn AclRepository,
    principal: &Principal,
    id: &str,
) -> Result<Task, DomainError> {
    acl.can_write(uow, Stream::Tasks, &[id.to_owned()], principal)
        .await?;
    repo.get(uow, id).await
}

/// Moves a loaded task from `from` to `to`, appending at the next version.
async fn transition(
    uow: &UnitOfWork,
    repo: &dyn TaskRepository,
    task: &Task,
    saga_id: Option<&str>,
    from: TaskStatus,
    to: TaskStatus,
) -> Result<TaskEvent, DomainError> {
    if task.status != from {
        return Err(DomainError::Validation(format!(
            "task {} is {}, expected {from}",
            task.id, task.status
        )));
    }

    repo.update(
        uow,
        &task.id,
        saga_id,
        task.version + 1,
        TaskData {
            status: Some(to),
            ..TaskData::default()
        },
    )
    .await
}

/// Handles the `CreateTask` command: creates a pending task and grants the
/// creator read and write access.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the caller is not a user or the title
/// is empty, or any repository or ACL error.
pub async fn handle_create_task(
    command: &CreateTask,
    uow: &UnitOfWork,
    ids: &dyn IdGenerator,
    repo: &dyn TaskRepository,
    acl: &dyn AclRepository,
) -> Result<TaskEvent, DomainError> {
    if command.principal.user_type != UserType::User {
        return Err(DomainError::Validation("only users may create tasks".into()));
    }
    if command.title.trim().is_empty() {
        return Err(DomainError::Validation("title must not be empty".into()));
    }

    let id = ids.next_id()?;
    let event = repo
        .create(
            uow,
            &id,
            command.saga_id(),
            TaskData {
                title: Some(command.title.clone()),
                description: Some(command.description.clone()),
                status: Some(TaskStatus::Pending),
                ..TaskData::default()
            },
        )
        .await?;

    acl.create_acl_entry(
        uow,
        Stream::Tasks,
        &id,
        &command.principal,
        Permissions::READ | Permissions::WRITE,
    )
    .await?;

    debug!(
        command = command.command_type(),
        task_id = %id,
        user_id = %command.principal.user_id,
        "task created and granted to creator"
    );
    Ok(event)
}

/// Handles the `UpdateTask` command.
///
/// # Errors
///
/// Returns `DomainError::Validation` if neither field is set,
/// `DomainError::AccessDenied`, `DomainError::NotFound`, or a concurrency
/// conflict from the repository.
pub async fn handle_update_task(
    command: &UpdateTask,
    uow: &UnitOfWork,
    repo: &dyn TaskRepository,
    acl: &dyn AclRepository,
) -> Result<TaskEvent, DomainError> {
    if command.title.is_none() && command.description.is_none() {
        return Err(DomainError::Validation(
            "update requires a title or description".into(),
        ));
    }

    let task = load_writable(uow, repo, acl, &command.principal, &command.id).await?;
    repo.update(
        uow,
        &command.id,
        command.saga_id(),
        task.version + 1,
        TaskData {
            title: command.title.clone(),
            description: command.description.clone(),
            ..TaskData::default()
        },
    )
    .await
}

/// Handles the `ProgressTask` command: `pending` to `progress`.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the task is not pending, or any
/// access, lookup or concurrency error.
pub async fn handle_progress_task(
    command: &ProgressTask,
    uow: &UnitOfWork,
    repo: &dyn TaskRepository,
    acl: &dyn AclRepository,
) -> Result<TaskEvent, DomainError> {
    let task = load_writable(uow, repo, acl, &command.principal, &command.id).await?;
    transition(
        uow,
        repo,
        &task,
        command.saga_id(),
        TaskStatus::Pending,
        TaskStatus::Progress,
    )
    .await
}

/// Handles the `CompleteTask` command: `progress` to `completed`.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the task is not in progress, or any
/// access, lookup or concurrency error.
pub async fn handle_complete_task(
    command: &CompleteTask,
    uow: &UnitOfWork,
    repo: &dyn TaskRepository,
    acl: &dyn AclRepository,
) -> Result<TaskEvent, DomainError> {
    let task = load_writable(uow, repo, acl, &command.principal, &command.id).await?;
    transition(
        uow,
        repo,
        &task,
        command.saga_id(),
        TaskStatus::Progress,
        TaskStatus::Completed,
    )
    .await
}

/// Handles the `DeleteTask` command: deletes the task and every ACL entry on
/// it.
///
/// # Errors
///
/// Returns any access, lookup, concurrency or ACL error.
pub async fn handle_delete_task(
    command: &DeleteTask,
    uow: &UnitOfWork,
    repo: &dyn TaskRepository,
    acl: &dyn AclRepository,
) -> Result<TaskEvent, DomainError> {
    let task = load_writable(uow, repo, acl, &command.principal, &command.id).await?;
    let event = repo
        .delete(uow, &command.id, command.saga_id(), task.version + 1)
        .await?;
    let revoked = acl
        .delete_acl_entries(uow, Stream::Tasks, &command.id)
        .await?;
    debug!(
        command = command.command_type(),
        task_id = %command.id,
        revoked = revoked.len(),
        "task deleted"
    );
    Ok(event)
}
