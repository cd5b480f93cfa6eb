//! `PostgreSQL` implementation of the `UnitOfWork` trait.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use catalog_core::error::DomainError;
use catalog_core::event::DomainEvent;
use catalog_core::unit_of_work::{EventLedger, TransactionId, UnitOfWork};
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::{MappedMutexGuard, MutexGuard};
use tracing::{debug, warn};

use crate::db_error;

struct UowState<E> {
    transaction: Option<TransactionId>,
    ledger: EventLedger<E>,
}

/// Unit of work over a sqlx transaction.
///
/// One instance belongs to one logical operation. Repositories obtain their
/// connection through [`PgUnitOfWork::connection`] and never begin a
/// transaction of their own.
pub struct PgUnitOfWork<E> {
    pool: PgPool,
    transaction: tokio::sync::Mutex<Option<Transaction<'static, Postgres>>>,
    state: Mutex<UowState<E>>,
}

impl<E> std::fmt::Debug for PgUnitOfWork<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgUnitOfWork")
            .field("transaction", &self.state().transaction)
            .finish_non_exhaustive()
    }
}

/// Connection handed to a repository: the active transaction if there is
/// one, otherwise a pooled connection in autocommit mode.
pub enum PgConnectionHandle<'a> {
    /// The unit of work's open transaction.
    Transaction(MappedMutexGuard<'a, Transaction<'static, Postgres>>),
    /// A connection checked out of the pool.
    Pooled(PoolConnection<Postgres>),
}

impl Deref for PgConnectionHandle<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match self {
            Self::Transaction(tx) => &***tx,
            Self::Pooled(conn) => &**conn,
        }
    }
}

impl DerefMut for PgConnectionHandle<'_> {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match self {
            Self::Transaction(tx) => &mut ***tx,
            Self::Pooled(conn) => &mut **conn,
        }
    }
}

impl<E> PgUnitOfWork<E> {
    /// Creates a unit of work drawing connections from `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            transaction: tokio::sync::Mutex::new(None),
            state: Mutex::new(UowState {
                transaction: None,
                ledger: EventLedger::new(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, UowState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the connection repositories must write through.
    ///
    /// The handle holds the transaction until dropped, so it must not be
    /// kept across calls into other repositories.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if no transaction is active and
    /// the pool cannot hand out a connection.
    pub async fn connection(&self) -> Result<PgConnectionHandle<'_>, DomainError> {
        let guard = self.transaction.lock().await;
        let unlocked = match MutexGuard::try_map(guard, |slot| slot.as_mut()) {
            Ok(tx) => return Ok(PgConnectionHandle::Transaction(tx)),
            Err(guard) => guard,
        };
        drop(unlocked);
        let conn = self.pool.acquire().await.map_err(db_error)?;
        Ok(PgConnectionHandle::Pooled(conn))
    }

    async fn take_transaction(
        &self,
    ) -> Result<(TransactionId, Transaction<'static, Postgres>), DomainError> {
        let mut slot = self.transaction.lock().await;
        let tx = slot.take().ok_or(DomainError::NoActiveTransaction)?;
        let id = self
            .state()
            .transaction
            .take()
            .ok_or(DomainError::NoActiveTransaction)?;
        Ok((id, tx))
    }
}

#[async_trait]
impl<E: DomainEvent> UnitOfWork for PgUnitOfWork<E> {
    type Event = E;

    async fn start(&self) -> Result<(), DomainError> {
        let mut slot = self.transaction.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        *slot = Some(self.pool.begin().await.map_err(db_error)?);
        let transaction = TransactionId::new();
        self.state().transaction = Some(transaction);
        debug!(%transaction, "postgres transaction started");
        Ok(())
    }

    async fn commit(&self) -> Result<(), DomainError> {
        let (transaction, tx) = self.take_transaction().await?;
        if let Err(err) = tx.commit().await {
            warn!(%transaction, error = %err, "commit failed, discarding tracked events");
            self.state().ledger.discard();
            return Err(db_error(err));
        }
        self.state().ledger.release();
        debug!(%transaction, "postgres transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DomainError> {
        let (transaction, tx) = self.take_transaction().await?;
        self.state().ledger.discard();
        tx.rollback().await.map_err(db_error)?;
        debug!(%transaction, "postgres transaction rolled back");
        Ok(())
    }

    fn transaction_id(&self) -> Option<TransactionId> {
        self.state().transaction
    }

    fn track(&self, events: Vec<E>) {
        let mut state = self.state();
        let in_transaction = state.transaction.is_some();
        state.ledger.record(events, in_transaction);
    }

    fn take_committed_events(&self) -> Vec<E> {
        self.state().ledger.take_released()
    }
}

#[cfg(test)]
mod tests {
    use catalog_videos::domain::events::VideoEvent;
    use sqlx::postgres::PgPoolOptions;

    use super::*;

    fn lazy_uow() -> PgUnitOfWork<VideoEvent> {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/catalog")
            .unwrap();
        PgUnitOfWork::new(pool)
    }

    #[tokio::test]
    async fn test_commit_without_transaction_is_programmer_error() {
        let uow = lazy_uow();

        let result = uow.commit().await;

        assert!(matches!(result, Err(DomainError::NoActiveTransaction)));
    }

    #[tokio::test]
    async fn test_rollback_without_transaction_is_programmer_error() {
        let uow = lazy_uow();

        let result = uow.rollback().await;

        assert!(matches!(result, Err(DomainError::NoActiveTransaction)));
    }

    #[tokio::test]
    async fn test_no_transaction_before_start() {
        let uow = lazy_uow();

        assert!(uow.transaction_id().is_none());
        assert!(uow.take_committed_events().is_empty());
    }
}
