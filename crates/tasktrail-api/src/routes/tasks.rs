//! Routes for tasks.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, instrument};

use tasktrail_tasks::application::{command_handlers, query_handlers};
use tasktrail_tasks::domain::commands;
use tasktrail_tasks::domain::models::Task;

use super::{CommandResponse, PageQuery};
use crate::context::{Caller, RequestUnitOfWork, Saga, Traced, traced};
use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    /// Task title.
    pub title: String,
    /// Task description.
    #[serde(default)]
    pub description: String,
}

/// Request body for PATCH /{id}.
#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    /// New title, if changing.
    pub title: Option<String>,
    /// New description, if changing.
    pub description: Option<String>,
}

/// POST /
#[instrument(skip_all, fields(user_id = %caller.user_id))]
async fn create_task(
    State(state): State<AppState>,
    RequestUnitOfWork(uow): RequestUnitOfWork,
    Caller(caller): Caller,
    Saga(saga_id): Saga,
    Json(request): Json<CreateTaskRequest>,
) -> Result<Traced<CommandResponse>, ApiError> {
    let command = commands::CreateTask {
        saga_id,
        principal: caller,
        title: request.title,
        description: request.description,
    };

    info!(saga_id = ?command.saga_id, "handling create_task command");

    let event = uow
        .run(command_handlers::handle_create_task(
            &command,
            &uow,
            &*state.id_generator,
            &*state.tasks,
            &*state.acl,
        ))
        .await?;

    Ok(traced(&uow, CommandResponse::from(&event)))
}

/// GET /
#[instrument(skip_all, fields(count_per_page = page.count_per_page, page_number = page.page_number))]
async fn list_tasks(
    State(state): State<AppState>,
    RequestUnitOfWork(uow): RequestUnitOfWork,
    Query(page): Query<PageQuery>,
) -> Result<Traced<Vec<Task>>, ApiError> {
    let tasks = uow
        .run(query_handlers::handle_list_tasks(
            &uow,
            &*state.tasks,
            page.count_per_page,
            page.page_number,
        ))
        .await?;

    Ok(traced(&uow, tasks))
}

/// GET /{id}
#[instrument(skip_all, fields(task_id = %id, user_id = %caller.user_id))]
async fn get_task(
    State(state): State<AppState>,
    RequestUnitOfWork(uow): RequestUnitOfWork,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Traced<Task>, ApiError> {
    let task = uow
        .run(query_handlers::handle_get_task(&uow, &*state.tasks, &*state.acl, &caller, &id))
        .await?;

    Ok(traced(&uow, task))
}

/// PATCH /{id}
#[instrument(skip_all, fields(task_id = %id, user_id = %caller.user_id))]
async fn update_task(
    State(state): State<AppState>,
    RequestUnitOfWork(uow): RequestUnitOfWork,
    Caller(caller): Caller,
    Saga(saga_id): Saga,
    Path(id): Path<String>,
    Json(request): Json<UpdateTaskRequest>,
) -> Result<Traced<CommandResponse>, ApiError> {
    let command = commands::UpdateTask {
        saga_id,
        principal: caller,
        id,
        title: request.title,
        description: request.description,
    };

    info!(saga_id = ?command.saga_id, "handling update_task command");

    let event = uow
        .run(command_handlers::handle_update_task(&command, &uow, &*state.tasks, &*state.acl))
        .await?;

    Ok(traced(&uow, CommandResponse::from(&event)))
}

/// POST /{id}/progress
#[instrument(skip_all, fields(task_id = %id, user_id = %caller.user_id))]
async fn progress_task(
    State(state): State<AppState>,
    RequestUnitOfWork(uow): RequestUnitOfWork,
    Caller(caller): Caller,
    Saga(saga_id): Saga,
    Path(id): Path<String>,
) -> Result<Traced<CommandResponse>, ApiError> {
    let command = commands::ProgressTask {
        saga_id,
        principal: caller,
        id,
    };

    info!(saga_id = ?command.saga_id, "handling progress_task command");

    let event = uow
        .run(command_handlers::handle_progress_task(&command, &uow, &*state.tasks, &*state.acl))
        .await?;

    Ok(traced(&uow, CommandResponse::from(&event)))
}

/// POST /{id}/complete
#[instrument(skip_all, fields(task_id = %id, user_id = %caller.user_id))]
async fn complete_task(
    State(state): State<AppState>,
    RequestUnitOfWork(uow): RequestUnitOfWork,
    Caller(caller): Caller,
    Saga(saga_id): Saga,
    Path(id): Path<String>,
) -> Result<Traced<CommandResponse>, ApiError> {
    let command = commands::CompleteTask {
        saga_id,
        principal: caller,
        id,
    };

    info!(saga_id = ?command.saga_id, "handling complete_task command");

    let event = uow
        .run(command_handlers::handle_complete_task(&command, &uow, &*state.tasks, &*state.acl))
        .await?;

    Ok(traced(&uow, CommandResponse::from(&event)))
}

/// DELETE /{id}
#[instrument(skip_all, fields(task_id = %id, user_id = %caller.user_id))]
async fn delete_task(
    State(state): State<AppState>,
    RequestUnitOfWork(uow): RequestUnitOfWork,
    Caller(caller): Caller,
    Saga(saga_id): Saga,
    Path(id): Path<String>,
) -> Result<Traced<CommandResponse>, ApiError> {
    let command = commands::DeleteTask {
        saga_id,
        principal: caller,
        id,
    };

    info!(saga_id = ?command.saga_id, "handling delete_task command");

    let event = uow
        .run(command_handlers::handle_delete_task(&command, &uow, &*state.tasks, &*state.acl))
        .await?;

    Ok(traced(&uow, CommandResponse::from(&event)))
}

/// Returns the router for tasks.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_task).get(list_tasks))
        .route("/{id}", get(get_task).patch(update_task).delete(delete_task))
        .route("/{id}/progress", post(progress_task))
        .route("/{id}/complete", post(complete_task))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::Value;
    use tasktrail_core::acl::{AclEntry, AclRepository, Permissions, Principal};
    use tasktrail_core::error::DomainError;
    use tasktrail_core::event::{Stream, TracingEventDispatcher};
    use tasktrail_core::retry::RetryPolicy;
    use tasktrail_core::unit_of_work::{UnitOfWork, UnitOfWorkFactory};
    use tower::ServiceExt;

    use crate::routes::test_state;

    async fn send(request: Request<Body>) -> (StatusCode, Value) {
        let app = router().with_state(test_state::offline());
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn create_request(user_type: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .header("x-user-type", user_type)
            .header("x-user-id", "caller-1")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_task_without_caller_headers_returns_400() {
        // Arrange
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"title":"Water plants"}"#))
            .unwrap();

        // Act
        let (status, json) = send(request).await;

        // Assert
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_create_task_with_unknown_user_type_returns_400() {
        let (status, json) =
            send(create_request("robot", &serde_json::json!({ "title": "Water plants" }))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_create_task_as_application_returns_400() {
        // Arrange
        let request = create_request("application", &serde_json::json!({ "title": "Sync" }));

        // Act
        let (status, json) = send(request).await;

        // Assert
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["message"].as_str().unwrap().contains("only users"));
    }

    #[tokio::test]
    async fn test_create_task_returns_422_for_missing_title() {
        let (status, _) = send(create_request("user", &serde_json::json!({}))).await;

        // Axum returns 422 for deserialization failures.
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    /// Access checks that never answer within a request's deadline.
    struct StalledAclRepository;

    #[async_trait::async_trait]
    impl AclRepository for StalledAclRepository {
        async fn create_acl_entry(
            &self,
            _uow: &UnitOfWork,
            _stream: Stream,
            _stream_id: &str,
            _principal: &Principal,
            _permissions: Permissions,
        ) -> Result<AclEntry, DomainError> {
            unimplemented!("stalled")
        }

        async fn delete_acl_entry(
            &self,
            _uow: &UnitOfWork,
            _stream: Stream,
            _stream_id: &str,
            _principal: &Principal,
        ) -> Result<AclEntry, DomainError> {
            unimplemented!("stalled")
        }

        async fn delete_acl_entries(
            &self,
            _uow: &UnitOfWork,
            _stream: Stream,
            _stream_id: &str,
        ) -> Result<Vec<AclEntry>, DomainError> {
            unimplemented!("stalled")
        }

        async fn permissions_for(
            &self,
            _uow: &UnitOfWork,
            _stream: Stream,
            _stream_ids: &[String],
            _principal: &Principal,
        ) -> Result<Permissions, DomainError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Permissions::ALL)
        }
    }

    #[tokio::test]
    async fn test_request_past_its_deadline_returns_503() {
        // Arrange
        let state = AppState {
            uow_factory: UnitOfWorkFactory::new(
                RetryPolicy::immediate(0),
                Arc::new(TracingEventDispatcher),
                Duration::from_millis(50),
            ),
            acl: Arc::new(StalledAclRepository),
            ..test_state::offline()
        };
        let request = Request::builder()
            .uri("/task-1")
            .header("x-user-type", "user")
            .header("x-user-id", "caller-1")
            .body(Body::empty())
            .unwrap();

        // Act
        let response = tokio::time::timeout(
            Duration::from_secs(5),
            router().with_state(state).oneshot(request),
        )
        .await
        .expect("request outlived its deadline")
        .unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(json["error"], "request_interrupted");
    }

    #[tokio::test]
    async fn test_update_task_without_changes_returns_400() {
        // Arrange
        let request = Request::builder()
            .method("PATCH")
            .uri("/task-1")
            .header("content-type", "application/json")
            .header("x-user-type", "user")
            .header("x-user-id", "caller-1")
            .body(Body::from("{}"))
            .unwrap();

        // Act
        let (status, json) = send(request).await;

        // Assert
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }
}
