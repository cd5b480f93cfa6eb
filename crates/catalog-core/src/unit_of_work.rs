//! Unit of Work: transaction demarcation for a single logical operation.
//!
//! A unit of work owns at most one physical transaction at a time.
//! Repositories attach their writes to [`UnitOfWork::transaction_id`] (or
//! to the adapter's transaction handle) instead of opening their own, and
//! hand the events of every aggregate they write to [`UnitOfWork::track`].
//! Tracked events are released by a successful commit and discarded by a
//! rollback.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::DomainEvent;

/// Opaque handle of an active transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generates a fresh transaction handle.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Transaction boundary for one logical operation.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Event family of the aggregates written through this unit of work.
    type Event: DomainEvent;

    /// Opens a transaction unless one is already active.
    async fn start(&self) -> Result<(), DomainError>;

    /// Commits the active transaction and releases tracked events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NoActiveTransaction` if no transaction is open.
    async fn commit(&self) -> Result<(), DomainError>;

    /// Rolls back the active transaction and discards tracked events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NoActiveTransaction` if no transaction is open.
    async fn rollback(&self) -> Result<(), DomainError>;

    /// Returns the active transaction handle, if any.
    fn transaction_id(&self) -> Option<TransactionId>;

    /// Takes ownership of events drained from an aggregate written in the
    /// current operation.
    fn track(&self, events: Vec<Self::Event>);

    /// Takes the events released by committed transactions, in the order
    /// they were tracked.
    fn take_committed_events(&self) -> Vec<Self::Event>;
}

/// Runs `work` inside a transaction of `uow`.
///
/// Opens a transaction only if none is active. A call that joins an active
/// transaction never commits or rolls back; the call that opened the
/// transaction commits when `work` succeeds and rolls back when it fails.
/// Either way the handle is cleared, so `uow` can be reused.
///
/// # Errors
///
/// Returns the error produced by `work`, or the error raised while opening
/// or committing the transaction.
pub async fn run_in_transaction<U, T, F, Fut>(uow: &U, work: F) -> Result<T, DomainError>
where
    U: UnitOfWork + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    if let Some(transaction_id) = uow.transaction_id() {
        debug!(%transaction_id, "joining active transaction");
        return work().await;
    }

    uow.start().await?;

    match work().await {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                error!(error = %rollback_err, cause = %err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Bookkeeping of tracked events shared by unit-of-work adapters.
#[derive(Debug)]
pub struct EventLedger<E> {
    pending: Vec<E>,
    released: Vec<E>,
}

impl<E> Default for EventLedger<E> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            released: Vec::new(),
        }
    }
}

impl<E> EventLedger<E> {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records events written inside (`in_transaction`) or outside a
    /// transaction. Writes outside a transaction are already durable, so
    /// their events are released immediately.
    pub fn record(&mut self, events: Vec<E>, in_transaction: bool) {
        if in_transaction {
            self.pending.extend(events);
        } else {
            self.released.extend(events);
        }
    }

    /// Moves pending events to the released list after a commit.
    pub fn release(&mut self) {
        self.released.append(&mut self.pending);
    }

    /// Drops pending events after a rollback.
    pub fn discard(&mut self) {
        self.pending.clear();
    }

    /// Number of events waiting for the transaction outcome.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Takes the released events.
    pub fn take_released(&mut self) -> Vec<E> {
        std::mem::take(&mut self.released)
    }
}
