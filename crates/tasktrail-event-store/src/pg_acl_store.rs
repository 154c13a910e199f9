//! `PostgreSQL` implementation of the durable ACL table.

use async_trait::async_trait;
use sqlx::PgPool;
use tasktrail_core::acl::{AclEntry, AclStore, Permissions, Principal};
use tasktrail_core::error::DomainError;
use tasktrail_core::event::Stream;
use tasktrail_core::unit_of_work::UnitOfWork;
use tracing::{Instrument, debug};

use crate::error::{database_error, is_unique_violation};
use crate::pg_transaction::relational_transaction;

const ACL_COLUMNS: &str = "stream, stream_id, user_type, user_id, permissions";

#[derive(Debug, sqlx::FromRow)]
struct AclRow {
    stream: String,
    stream_id: String,
    user_type: String,
    user_id: String,
    permissions: i32,
}

impl TryFrom<AclRow> for AclEntry {
    type Error = DomainError;

    fn try_from(row: AclRow) -> Result<Self, Self::Error> {
        let corrupt = |e: DomainError| DomainError::Infrastructure(format!("acl row: {e}"));
        Ok(Self {
            stream: row.stream.parse().map_err(corrupt)?,
            principal: Principal::new(row.user_type.parse().map_err(corrupt)?, row.user_id),
            stream_id: row.stream_id,
            permissions: Permissions::from_bits(row.permissions),
        })
    }
}

fn entries(rows: Vec<AclRow>) -> Result<Vec<AclEntry>, DomainError> {
    rows.into_iter().map(AclEntry::try_from).collect()
}

/// PostgreSQL-backed ACL table. Writes join the unit of work's relational
/// transaction; reads go straight to the pool.
#[derive(Debug, Clone)]
pub struct PgAclStore {
    pool: PgPool,
}

impl PgAclStore {
    /// Creates a new `PgAclStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AclStore for PgAclStore {
    async fn insert(&self, uow: &UnitOfWork, entry: &AclEntry) -> Result<AclEntry, DomainError> {
        async {
            let tx = relational_transaction(uow, &self.pool).await?;
            let mut guard = tx.lock().await?;

            let row: AclRow = sqlx::query_as(&format!(
                "INSERT INTO acl ({ACL_COLUMNS}) VALUES ($1, $2, $3, $4, $5) RETURNING {ACL_COLUMNS}"
            ))
            .bind(entry.stream.as_str())
            .bind(&entry.stream_id)
            .bind(entry.principal.user_type.as_str())
            .bind(&entry.principal.user_id)
            .bind(entry.permissions.bits())
            .fetch_one(&mut **guard)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DomainError::Validation(format!(
                        "acl entry for {} {} on {} {} already exists",
                        entry.principal.user_type,
                        entry.principal.user_id,
                        entry.stream,
                        entry.stream_id
                    ))
                } else {
                    database_error("insert acl entry", &e)
                }
            })?;

            debug!(stream = %entry.stream, stream_id = %entry.stream_id, "acl entry inserted");
            row.try_into()
        }
        .instrument(uow.span())
        .await
    }

    async fn delete(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_id: &str,
        principal: &Principal,
    ) -> Result<Option<AclEntry>, DomainError> {
        async {
            let tx = relational_transaction(uow, &self.pool).await?;
            let mut guard = tx.lock().await?;

            let row: Option<AclRow> = sqlx::query_as(&format!(
                r"
                DELETE FROM acl
                WHERE stream = $1 AND stream_id = $2 AND user_type = $3 AND user_id = $4
                RETURNING {ACL_COLUMNS}
                "
            ))
            .bind(stream.as_str())
            .bind(stream_id)
            .bind(principal.user_type.as_str())
            .bind(&principal.user_id)
            .fetch_optional(&mut **guard)
            .await
            .map_err(|e| database_error("delete acl entry", &e))?;

            row.map(AclEntry::try_from).transpose()
        }
        .instrument(uow.span())
        .await
    }

    async fn delete_all(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_id: &str,
    ) -> Result<Vec<AclEntry>, DomainError> {
        async {
            let tx = relational_transaction(uow, &self.pool).await?;
            let mut guard = tx.lock().await?;

            let rows: Vec<AclRow> = sqlx::query_as(&format!(
                "DELETE FROM acl WHERE stream = $1 AND stream_id = $2 RETURNING {ACL_COLUMNS}"
            ))
            .bind(stream.as_str())
            .bind(stream_id)
            .fetch_all(&mut **guard)
            .await
            .map_err(|e| database_error("delete acl entries", &e))?;

            debug!(%stream, stream_id, removed = rows.len(), "acl entries deleted");
            entries(rows)
        }
        .instrument(uow.span())
        .await
    }

    async fn fetch_one(
        &self,
        stream: Stream,
        stream_id: &str,
        principal: &Principal,
    ) -> Result<Option<AclEntry>, DomainError> {
        let row: Option<AclRow> = sqlx::query_as(&format!(
            r"
            SELECT {ACL_COLUMNS} FROM acl
            WHERE stream = $1 AND stream_id = $2 AND user_type = $3 AND user_id = $4
            "
        ))
        .bind(stream.as_str())
        .bind(stream_id)
        .bind(principal.user_type.as_str())
        .bind(&principal.user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("fetch acl entry", &e))?;

        row.map(AclEntry::try_from).transpose()
    }

    async fn fetch_many(
        &self,
        stream: Stream,
        stream_ids: &[String],
        principal: &Principal,
    ) -> Result<Vec<AclEntry>, DomainError> {
        let rows: Vec<AclRow> = sqlx::query_as(&format!(
            r"
            SELECT {ACL_COLUMNS} FROM acl
            WHERE stream = $1 AND user_type = $2 AND user_id = $3 AND stream_id = ANY($4)
            "
        ))
        .bind(stream.as_str())
        .bind(principal.user_type.as_str())
        .bind(&principal.user_id)
        .bind(stream_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("fetch acl entries", &e))?;

        entries(rows)
    }
}
