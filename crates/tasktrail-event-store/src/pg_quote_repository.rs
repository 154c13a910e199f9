//! `PostgreSQL` implementation of the `QuoteRepository` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tasktrail_core::error::DomainError;
use tasktrail_core::event::{EventKind, Stream};
use tasktrail_core::unit_of_work::UnitOfWork;
use tasktrail_quotes::domain::models::{Quote, QuoteData, QuoteEvent};
use tasktrail_quotes::domain::repository::QuoteRepository;
use tracing::{Instrument, debug};

use crate::error::{database_error, from_db_version, page_bounds, to_db_version};
use crate::events::{NewEvent, append, conflict, require_successor};
use crate::pg_transaction::relational_transaction;

const SELECT_QUOTE: &str =
    "SELECT id, quote, version, date_time_created, date_time_updated FROM quotes";

#[derive(Debug, sqlx::FromRow)]
struct QuoteRow {
    id: String,
    quote: String,
    version: i64,
    date_time_created: DateTime<Utc>,
    date_time_updated: DateTime<Utc>,
}

impl TryFrom<QuoteRow> for Quote {
    type Error = DomainError;

    fn try_from(row: QuoteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            version: from_db_version(row.version)?,
            id: row.id,
            quote: row.quote,
            date_time_created: row.date_time_created,
            date_time_updated: row.date_time_updated,
        })
    }
}

fn not_found(id: &str) -> DomainError {
    DomainError::NotFound {
        stream: Stream::Quotes.to_string(),
        id: id.to_owned(),
    }
}

/// PostgreSQL-backed quote repository.
#[derive(Debug, Clone)]
pub struct PgQuoteRepository {
    pool: PgPool,
}

impl PgQuoteRepository {
    /// Creates a new `PgQuoteRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuoteRepository for PgQuoteRepository {
    async fn create(
        &self,
        uow: &UnitOfWork,
        id: &str,
        saga_id: Option<&str>,
        quote: &str,
    ) -> Result<QuoteEvent, DomainError> {
        async {
            let tx = relational_transaction(uow, &self.pool).await?;
            let mut guard = tx.lock().await?;

            let event = append(
                &mut **guard,
                uow,
                NewEvent {
                    saga_id,
                    stream: Stream::Quotes,
                    stream_id: id,
                    event: EventKind::Created,
                    version: 0,
                    data: QuoteData {
                        quote: Some(quote.to_owned()),
                    },
                },
            )
            .await?;

            let row: QuoteRow = sqlx::query_as(
                r"
                INSERT INTO quotes (id, quote, version, date_time_created, date_time_updated)
                VALUES ($1, $2, 0, $3, $3)
                RETURNING id, quote, version, date_time_created, date_time_updated
                ",
            )
            .bind(id)
            .bind(quote)
            .bind(event.event_time)
            .fetch_one(&mut **guard)
            .await
            .map_err(|e| database_error("insert quote", &e))?;
            drop(guard);
            let created = Quote::try_from(row)?;

            uow.register_event(event.to_pending()?);
            debug!(quote_id = %created.id, version = created.version, "quote created");
            Ok(event)
        }
        .instrument(uow.span())
        .await
    }

    async fn get(&self, uow: &UnitOfWork, id: &str) -> Result<Quote, DomainError> {
        async {
            let row: Option<QuoteRow> = sqlx::query_as(&format!("{SELECT_QUOTE} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| database_error("get quote", &e))?;

            row.ok_or_else(|| not_found(id))?.try_into()
        }
        .instrument(uow.span())
        .await
    }

    async fn list(
        &self,
        uow: &UnitOfWork,
        count_per_page: u32,
        page_number: u32,
    ) -> Result<Vec<Quote>, DomainError> {
        async {
            let (limit, offset) = page_bounds(count_per_page, page_number)?;
            let rows: Vec<QuoteRow> = sqlx::query_as(&format!(
                "{SELECT_QUOTE} ORDER BY date_time_created, id LIMIT $1 OFFSET $2"
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| database_error("list quotes", &e))?;

            rows.into_iter().map(Quote::try_from).collect()
        }
        .instrument(uow.span())
        .await
    }

    async fn get_random(&self, uow: &UnitOfWork) -> Result<Quote, DomainError> {
        async {
            let row: Option<QuoteRow> =
                sqlx::query_as(&format!("{SELECT_QUOTE} ORDER BY random() LIMIT 1"))
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| database_error("random quote", &e))?;

            row.ok_or_else(|| not_found("random"))?.try_into()
        }
        .instrument(uow.span())
        .await
    }

    async fn delete(
        &self,
        uow: &UnitOfWork,
        id: &str,
        saga_id: Option<&str>,
        expected_version: u64,
    ) -> Result<QuoteEvent, DomainError> {
        async {
            require_successor(Stream::Quotes, id, expected_version)?;
            let new_version = to_db_version(expected_version)?;

            let tx = relational_transaction(uow, &self.pool).await?;
            let mut guard = tx.lock().await?;

            let event = append(
                &mut **guard,
                uow,
                NewEvent {
                    saga_id,
                    stream: Stream::Quotes,
                    stream_id: id,
                    event: EventKind::Deleted,
                    version: expected_version,
                    data: QuoteData::default(),
                },
            )
            .await?;

            let removed: Option<String> = sqlx::query_scalar(
                "DELETE FROM quotes WHERE id = $1 AND version = $2 RETURNING id",
            )
            .bind(id)
            .bind(new_version - 1)
            .fetch_optional(&mut **guard)
            .await
            .map_err(|e| database_error("delete quote", &e))?;
            drop(guard);

            if removed.is_none() {
                return Err(conflict(Stream::Quotes, id, expected_version));
            }

            uow.register_event(event.to_pending()?);
            debug!(quote_id = %id, version = expected_version, "quote deleted");
            Ok(event)
        }
        .instrument(uow.span())
        .await
    }
}
