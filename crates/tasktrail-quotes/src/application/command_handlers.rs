//! Command handlers for the quote context.

use tasktrail_core::command::Command;
use tasktrail_core::error::DomainError;
use tasktrail_core::id::IdGenerator;
use tasktrail_core::unit_of_work::UnitOfWork;

use crate::domain::commands::CreateQuote;
use crate::domain::models::QuoteEvent;
use crate::domain::repository::QuoteRepository;

/// Handles the `CreateQuote` command.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the quote is blank, or any id
/// generation or repository error.
pub async fn handle_create_quote(
    command: &CreateQuote,
    uow: &UnitOfWork,
    ids: &dyn IdGenerator,
    repo: &dyn QuoteRepository,
) -> Result<QuoteEvent, DomainError> {
    let quote = command.quote.trim();
    if quote.is_empty() {
        return Err(DomainError::Validation("quote must not be empty".into()));
    }

    let id = ids.next_id()?;
    repo.create(uow, &id, command.saga_id(), quote).await
}
