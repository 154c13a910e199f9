//! Persistence contract for quotes.

use async_trait::async_trait;
use tasktrail_core::error::DomainError;
use tasktrail_core::unit_of_work::UnitOfWork;

use super::models::{Quote, QuoteEvent};

/// Event-sourced quote repository.
#[async_trait]
pub trait QuoteRepository: Send + Sync {
    /// Appends the `created` event at version 0 and inserts the row.
    async fn create(
        &self,
        uow: &UnitOfWork,
        id: &str,
        saga_id: Option<&str>,
        quote: &str,
    ) -> Result<QuoteEvent, DomainError>;

    /// Loads one quote. `NotFound` if absent.
    async fn get(&self, uow: &UnitOfWork, id: &str) -> Result<Quote, DomainError>;

    /// Loads one page of quotes, oldest first. Pages start at 0.
    async fn list(
        &self,
        uow: &UnitOfWork,
        count_per_page: u32,
        page_number: u32,
    ) -> Result<Vec<Quote>, DomainError>;

    /// Loads a uniformly random quote. `NotFound` if there are none.
    async fn get_random(&self, uow: &UnitOfWork) -> Result<Quote, DomainError>;

    /// Appends a `deleted` event at `expected_version` and removes a row at
    /// `expected_version - 1`. `ConcurrencyConflict` if the row has moved on.
    async fn delete(
        &self,
        uow: &UnitOfWork,
        id: &str,
        saga_id: Option<&str>,
        expected_version: u64,
    ) -> Result<QuoteEvent, DomainError>;
}
