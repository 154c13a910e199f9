//! Routes for quotes.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, instrument};

use tasktrail_quotes::application::{command_handlers, query_handlers};
use tasktrail_quotes::domain::commands;
use tasktrail_quotes::domain::models::Quote;

use super::{CommandResponse, PageQuery};
use crate::context::{RequestUnitOfWork, Saga, Traced, traced};
use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /.
#[derive(Debug, Deserialize)]
pub struct CreateQuoteRequest {
    /// The quote text.
    pub quote: String,
}

/// POST /
#[instrument(skip_all)]
async fn create_quote(
    State(state): State<AppState>,
    RequestUnitOfWork(uow): RequestUnitOfWork,
    Saga(saga_id): Saga,
    Json(request): Json<CreateQuoteRequest>,
) -> Result<Traced<CommandResponse>, ApiError> {
    let command = commands::CreateQuote {
        saga_id,
        quote: request.quote,
    };

    info!(saga_id = ?command.saga_id, "handling create_quote command");

    let event = uow
        .run(command_handlers::handle_create_quote(
            &command,
            &uow,
            &*state.id_generator,
            &*state.quotes,
        ))
        .await?;

    Ok(traced(&uow, CommandResponse::from(&event)))
}

/// GET /random
#[instrument(skip_all)]
async fn random_quote(
    State(state): State<AppState>,
    RequestUnitOfWork(uow): RequestUnitOfWork,
) -> Result<Traced<Quote>, ApiError> {
    let quote = uow
        .run(query_handlers::handle_get_random_quote(&uow, &*state.quotes))
        .await?;

    Ok(traced(&uow, quote))
}

/// GET /
#[instrument(skip_all, fields(count_per_page = page.count_per_page, page_number = page.page_number))]
async fn list_quotes(
    State(state): State<AppState>,
    RequestUnitOfWork(uow): RequestUnitOfWork,
    Query(page): Query<PageQuery>,
) -> Result<Traced<Vec<Quote>>, ApiError> {
    let quotes = uow
        .run(query_handlers::handle_list_quotes(
            &uow,
            &*state.quotes,
            page.count_per_page,
            page.page_number,
        ))
        .await?;

    Ok(traced(&uow, quotes))
}

/// Returns the router for quotes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_quote).get(list_quotes))
        .route("/random", get(random_quote))
}
