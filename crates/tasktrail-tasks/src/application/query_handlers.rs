//! Query handlers for the task context.
//!
//! Queries read the `tasks` read model directly and never open a
//! transaction.

use tasktrail_core::acl::{AclRepository, Principal};
use tasktrail_core::error::DomainError;
use tasktrail_core::event::Stream;
use tasktrail_core::unit_of_work::UnitOfWork;

use crate::domain::models::Task;
use crate::domain::repository::TaskRepository;

/// Page size used when a list query does not set one.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Retrieves a task the principal may read.
///
/// # Errors
///
/// Returns `DomainError::AccessDenied` without read access, or
/// `DomainError::NotFound` if the task does not exist.
pub async fn handle_get_task(
    uow: &UnitOfWork,
    repo: &dyn TaskRepository,
    acl: &dyn AclRepository,
    principal: &Principal,
    id: &str,
) -> Result<Task, DomainError> {
    acl.can_read(uow, Stream::Tasks, &[id.to_owned()], principal)
        .await?;
    repo.get(uow, id).await
}

/// Lists one page of tasks. A page size of 0 means [`DEFAULT_PAGE_SIZE`].
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the read model cannot be queried.
pub async fn handle_list_tasks(
    uow: &UnitOfWork,
    repo: &dyn TaskRepository,
    count_per_page: u32,
    page_number: u32,
) -> Result<Vec<Task>, DomainError> {
    let count_per_page = if count_per_page == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        count_per_page
    };
    repo.list(uow, count_per_page, page_number).await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use tasktrail_core::acl::{AclEntry, Permissions, Principal, UserType};
    use tasktrail_core::error::DomainError;
    use tasktrail_core::event::Stream;
    use tasktrail_core::unit_of_work::UnitOfWork;
    use tasktrail_test_support::{InMemoryAclRepository, unit_of_work};

    use crate::application::query_handlers::{DEFAULT_PAGE_SIZE, handle_get_task, handle_list_tasks};
    use crate::domain::models::{Task, TaskData, TaskEvent, TaskStatus};
    use crate::domain::repository::TaskRepository;

    #[derive(Debug, Default)]
    struct ReadOnlyTaskRepository {
        tasks: Vec<Task>,
        pages: Mutex<Vec<(u32, u32)>>,
    }

    #[async_trait]
    impl TaskRepository for ReadOnlyTaskRepository {
        async fn create(
            &self,
            _uow: &UnitOfWork,
            _id: &str,
            _saga_id: Option<&str>,
            _data: TaskData,
        ) -> Result<TaskEvent, DomainError> {
            unimplemented!("read-only")
        }

        async fn get(&self, _uow: &UnitOfWork, id: &str) -> Result<Task, DomainError> {
            self.tasks
                .iter()
                .find(|task| task.id == id)
                .cloned()
                .ok_or_else(|| DomainError::NotFound {
                    stream: "tasks".into(),
                    id: id.to_owned(),
                })
        }

        async fn list(
            &self,
            _uow: &UnitOfWork,
            count_per_page: u32,
            page_number: u32,
        ) -> Result<Vec<Task>, DomainError> {
            self.pages.lock().unwrap().push((count_per_page, page_number));
            Ok(self.tasks.clone())
        }

        async fn update(
            &self,
            _uow: &UnitOfWork,
            _id: &str,
            _saga_id: Option<&str>,
            _expected_version: u64,
            _data: TaskData,
        ) -> Result<TaskEvent, DomainError> {
            unimplemented!("read-only")
        }

        async fn delete(
            &self,
            _uow: &UnitOfWork,
            _id: &str,
            _saga_id: Option<&str>,
            _expected_version: u64,
        ) -> Result<TaskEvent, DomainError> {
            unimplemented!("read-only")
        }
    }

    fn task(id: &str) -> Task {
        Task {
            id: id.to_owned(),
            title: "Water plants".to_owned(),
            description: String::new(),
            status: TaskStatus::Pending,
            random_map: HashMap::new(),
            metadata: serde_json::Map::new(),
            version: 0,
            date_time_created: Utc::now(),
            date_time_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_handle_get_task_returns_task_for_reader() {
        // Arrange
        let uow = unit_of_work();
        let principal = Principal::new(UserType::User, "reader");
        let repo = ReadOnlyTaskRepository {
            tasks: vec![task("t1")],
            ..ReadOnlyTaskRepository::default()
        };
        let acl = InMemoryAclRepository::with_entries([AclEntry {
            stream: Stream::Tasks,
            stream_id: "t1".to_owned(),
            principal: principal.clone(),
            permissions: Permissions::READ,
        }]);

        // Act
        let found = handle_get_task(&uow, &repo, &acl, &principal, "t1")
            .await
            .unwrap();

        // Assert
        assert_eq!(found.id, "t1");
    }

    #[tokio::test]
    async fn test_handle_get_task_without_entry_is_denied() {
        // Arrange
        let uow = unit_of_work();
        let repo = ReadOnlyTaskRepository {
            tasks: vec![task("t1")],
            ..ReadOnlyTaskRepository::default()
        };
        let acl = InMemoryAclRepository::default();
        let stranger = Principal::new(UserType::User, "stranger");

        // Act
        let result = handle_get_task(&uow, &repo, &acl, &stranger, "t1").await;

        // Assert
        match result.unwrap_err() {
            DomainError::AccessDenied { user_id, .. } => assert_eq!(user_id, "stranger"),
            other => panic!("expected AccessDenied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handle_list_tasks_defaults_page_size() {
        let uow = unit_of_work();
        let repo = ReadOnlyTaskRepository::default();

        handle_list_tasks(&uow, &repo, 0, 0).await.unwrap();
        handle_list_tasks(&uow, &repo, 10, 3).await.unwrap();

        assert_eq!(
            *repo.pages.lock().unwrap(),
            vec![(DEFAULT_PAGE_SIZE, 0), (10, 3)]
        );
    }
}
