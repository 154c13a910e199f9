//! Shared application state.

use std::fmt;
use std::sync::Arc;

use sqlx::PgPool;
use tasktrail_core::acl::{AclRepository, PermissionCache};
use tasktrail_core::id::{IdGenerator, UuidIdGenerator};
use tasktrail_core::unit_of_work::UnitOfWorkFactory;
use tasktrail_event_store::cached_acl_repository::CachedAclRepository;
use tasktrail_event_store::pg_acl_store::PgAclStore;
use tasktrail_event_store::pg_quote_repository::PgQuoteRepository;
use tasktrail_event_store::pg_task_repository::PgTaskRepository;
use tasktrail_quotes::domain::repository::QuoteRepository;
use tasktrail_tasks::domain::repository::TaskRepository;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Builds each request's unit of work.
    pub uow_factory: UnitOfWorkFactory,
    /// Aggregate id generator.
    pub id_generator: Arc<dyn IdGenerator>,
    /// Task repository.
    pub tasks: Arc<dyn TaskRepository>,
    /// Quote repository.
    pub quotes: Arc<dyn QuoteRepository>,
    /// Access-control repository.
    pub acl: Arc<dyn AclRepository>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("uow_factory", &self.uow_factory)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires the `PostgreSQL` repositories and the hybrid ACL repository over
    /// `cache`.
    #[must_use]
    pub fn with_postgres<C: PermissionCache + 'static>(
        pool: &PgPool,
        cache: Arc<C>,
        namespace: &str,
        acl_cache_capacity: usize,
        uow_factory: UnitOfWorkFactory,
    ) -> Self {
        let acl = CachedAclRepository::new(cache, PgAclStore::new(pool.clone()), namespace)
            .with_capacity(acl_cache_capacity);
        Self {
            uow_factory,
            id_generator: Arc::new(UuidIdGenerator),
            tasks: Arc::new(PgTaskRepository::new(pool.clone())),
            quotes: Arc::new(PgQuoteRepository::new(pool.clone())),
            acl: Arc::new(acl),
        }
    }
}
