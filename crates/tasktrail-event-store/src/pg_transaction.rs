//! The unit of work's relational transaction.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};
use tasktrail_core::error::DomainError;
use tasktrail_core::unit_of_work::{StoreKind, UnitOfWork, action};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::database_error;

/// A `PostgreSQL` transaction shared by every repository in one unit of work.
///
/// Settling takes the transaction out, so commit and rollback are each a
/// no-op once either has run.
#[derive(Debug)]
pub struct PgTransaction {
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PgTransaction {
    /// Opens a transaction on `pool`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if no connection can be acquired.
    pub async fn begin(pool: &PgPool) -> Result<Self, DomainError> {
        let tx = pool
            .begin()
            .await
            .map_err(|e| database_error("begin transaction", &e))?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
        })
    }

    /// Exclusive access to the open transaction.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ContextMisuse` if the transaction was already
    /// committed or rolled back.
    pub async fn lock(&self) -> Result<PgTransactionGuard<'_>, DomainError> {
        let guard = self.tx.lock().await;
        if guard.is_none() {
            return Err(DomainError::ContextMisuse(
                "relational transaction already settled".into(),
            ));
        }
        Ok(PgTransactionGuard(guard))
    }

    /// Commits the transaction if it is still open.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if `COMMIT` fails.
    pub async fn commit(&self) -> Result<(), DomainError> {
        let Some(tx) = self.tx.lock().await.take() else {
            return Ok(());
        };
        tx.commit()
            .await
            .map_err(|e| database_error("commit", &e))?;
        debug!("relational transaction committed");
        Ok(())
    }

    /// Rolls the transaction back if it is still open.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if `ROLLBACK` fails.
    pub async fn rollback(&self) -> Result<(), DomainError> {
        let Some(tx) = self.tx.lock().await.take() else {
            return Ok(());
        };
        tx.rollback()
            .await
            .map_err(|e| database_error("rollback", &e))?;
        debug!("relational transaction rolled back");
        Ok(())
    }
}

/// Exclusive access to an open transaction, returned by [`PgTransaction::lock`].
///
/// Wraps the unmapped guard: tokio's `MappedMutexGuard` is only `Send` under a
/// lifetime bound that rustc cannot prove inside boxed `async_trait` futures.
#[derive(Debug)]
pub struct PgTransactionGuard<'a>(MutexGuard<'a, Option<Transaction<'static, Postgres>>>);

impl Deref for PgTransactionGuard<'_> {
    type Target = Transaction<'static, Postgres>;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref().expect("checked open in PgTransaction::lock")
    }
}

impl DerefMut for PgTransactionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut().expect("checked open in PgTransaction::lock")
    }
}

/// The unit of work's relational transaction, opened on first use. The
/// opening call registers `COMMIT` as a commit action and `ROLLBACK` as a
/// compensation.
///
/// # Errors
///
/// Returns `DomainError::ContextMisuse` if the unit of work is settled or
/// done, or `DomainError::Infrastructure` if the transaction cannot be opened.
pub async fn relational_transaction(
    uow: &UnitOfWork,
    pool: &PgPool,
) -> Result<Arc<PgTransaction>, DomainError> {
    let (tx, is_new) = uow
        .get_transaction_object(StoreKind::Relational, || PgTransaction::begin(pool))
        .await?;

    if is_new {
        let commit = Arc::clone(&tx);
        uow.register_commit_action([action(move || {
            let tx = Arc::clone(&commit);
            async move { tx.commit().await }
        })]);

        let rollback = Arc::clone(&tx);
        uow.register_compensatory_action([action(move || {
            let tx = Arc::clone(&rollback);
            async move { tx.rollback().await }
        })]);
    }

    Ok(tx)
}
