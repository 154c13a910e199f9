//! Route modules organized by aggregate.

use axum::Router;
use serde::Serialize;
use tasktrail_core::event::{Event, EventKind};

use crate::state::AppState;

pub mod health;
pub mod quotes;
pub mod tasks;

/// Response body returned after a command is successfully handled.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    /// The aggregate the command applied to.
    pub id: String,
    /// Store-assigned id of the appended event.
    pub event_id: u64,
    /// The appended event type.
    pub event: EventKind,
    /// The aggregate's version after the command.
    pub version: u64,
}

impl<D> From<&Event<D>> for CommandResponse {
    fn from(event: &Event<D>) -> Self {
        Self {
            id: event.stream_id.clone(),
            event_id: event.id,
            event: event.event,
            version: event.version,
        }
    }
}

/// Query string for list endpoints. Both fields default to 0; a page size
/// of 0 selects the default page size.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageQuery {
    /// Items per page.
    pub count_per_page: u32,
    /// Zero-based page number.
    pub page_number: u32,
}

/// The full API: health check plus every aggregate under `/api/v1`.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/v1/tasks", tasks::router())
        .nest("/api/v1/quotes", quotes::router())
}

#[cfg(test)]
pub(crate) mod test_state {
    use std::sync::Arc;
    use std::time::Duration;

    use sqlx::PgPool;
    use tasktrail_core::event::TracingEventDispatcher;
    use tasktrail_core::retry::RetryPolicy;
    use tasktrail_core::unit_of_work::UnitOfWorkFactory;
    use tasktrail_test_support::InMemoryPermissionCache;

    use crate::state::AppState;

    /// State over a lazy pool that is never connected. Only requests that
    /// are rejected before reaching a repository can be served.
    pub(crate) fn offline() -> AppState {
        let pool = PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let factory = UnitOfWorkFactory::new(
            RetryPolicy::immediate(0),
            Arc::new(TracingEventDispatcher),
            Duration::from_secs(5),
        );
        AppState::with_postgres(
            &pool,
            Arc::new(InMemoryPermissionCache::default()),
            "test",
            100,
            factory,
        )
    }
}
