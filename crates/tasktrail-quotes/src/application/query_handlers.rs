//! Query handlers for the quote context.

use tasktrail_core::error::DomainError;
use tasktrail_core::unit_of_work::UnitOfWork;

use crate::domain::models::Quote;
use crate::domain::repository::QuoteRepository;

/// Page size used when a list query does not set one.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Retrieves a random quote.
///
/// # Errors
///
/// Returns `DomainError::NotFound` if there are no quotes.
pub async fn handle_get_random_quote(
    uow: &UnitOfWork,
    repo: &dyn QuoteRepository,
) -> Result<Quote, DomainError> {
    repo.get_random(uow).await
}

/// Lists one page of quotes. A page size of 0 means [`DEFAULT_PAGE_SIZE`].
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the read model cannot be queried.
pub async fn handle_list_quotes(
    uow: &UnitOfWork,
    repo: &dyn QuoteRepository,
    count_per_page: u32,
    page_number: u32,
) -> Result<Vec<Quote>, DomainError> {
    let count_per_page = if count_per_page == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        count_per_page
    };
    repo.list(uow, count_per_page, page_number).await
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use tasktrail_core::error::DomainError;
    use tasktrail_core::unit_of_work::UnitOfWork;
    use tasktrail_test_support::unit_of_work;

    use crate::application::query_handlers::{
        DEFAULT_PAGE_SIZE, handle_get_random_quote, handle_list_quotes,
    };
    use crate::domain::models::{Quote, QuoteEvent};
    use crate::domain::repository::QuoteRepository;

    #[derive(Debug, Default)]
    struct StaticQuoteRepository {
        quotes: Vec<Quote>,
        pages: Mutex<Vec<(u32, u32)>>,
    }

    #[async_trait]
    impl QuoteRepository for StaticQuoteRepository {
        async fn create(
            &self,
            _uow: &UnitOfWork,
            _id: &str,
            _saga_id: Option<&str>,
            _quote: &str,
        ) -> Result<QuoteEvent, DomainError> {
            unimplemented!("read-only")
        }

        async fn get(&self, _uow: &UnitOfWork, id: &str) -> Result<Quote, DomainError> {
            self.quotes
                .iter()
                .find(|quote| quote.id == id)
                .cloned()
                .ok_or_else(|| DomainError::NotFound {
                    stream: "quotes".into(),
                    id: id.to_owned(),
                })
        }

        async fn list(
            &self,
            _uow: &UnitOfWork,
            count_per_page: u32,
            page_number: u32,
        ) -> Result<Vec<Quote>, DomainError> {
            self.pages.lock().unwrap().push((count_per_page, page_number));
            Ok(self.quotes.clone())
        }

        async fn get_random(&self, _uow: &UnitOfWork) -> Result<Quote, DomainError> {
            self.quotes.first().cloned().ok_or_else(|| DomainError::NotFound {
                stream: "quotes".into(),
                id: "random".into(),
            })
        }

        async fn delete(
            &self,
            _uow: &UnitOfWork,
            _id: &str,
            _saga_id: Option<&str>,
            _expected_version: u64,
        ) -> Result<QuoteEvent, DomainError> {
            unimplemented!("read-only")
        }
    }

    fn quote(id: &str, text: &str) -> Quote {
        Quote {
            id: id.to_owned(),
            quote: text.to_owned(),
            version: 0,
            date_time_created: Utc::now(),
            date_time_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_handle_get_random_quote_returns_a_stored_quote() {
        let uow = unit_of_work();
        let repo = StaticQuoteRepository {
            quotes: vec![quote("q1", "Less is more.")],
            ..StaticQuoteRepository::default()
        };

        let found = handle_get_random_quote(&uow, &repo).await.unwrap();

        assert_eq!(found.quote, "Less is more.");
    }

    #[tokio::test]
    async fn test_handle_get_random_quote_without_quotes_is_not_found() {
        let uow = unit_of_work();
        let repo = StaticQuoteRepository::default();

        let result = handle_get_random_quote(&uow, &repo).await;

        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_handle_list_quotes_defaults_page_size() {
        let uow = unit_of_work();
        let repo = StaticQuoteRepository::default();

        handle_list_quotes(&uow, &repo, 0, 2).await.unwrap();

        assert_eq!(*repo.pages.lock().unwrap(), vec![(DEFAULT_PAGE_SIZE, 2)]);
    }
}
