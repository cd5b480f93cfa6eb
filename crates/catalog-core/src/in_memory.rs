//! In-memory transactional adapters.
//!
//! [`InMemoryTable`] stages writes per transaction and applies them when the
//! enlisting [`InMemoryUnitOfWork`] commits, giving repositories the same
//! all-or-nothing behavior they get from the Postgres adapter.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::unit_of_work::{EventLedger, TransactionId, UnitOfWork};

/// A store that takes part in in-memory transactions.
pub trait TransactionParticipant: Send + Sync {
    /// Applies the writes staged under `transaction`.
    fn commit(&self, transaction: TransactionId);

    /// Drops the writes staged under `transaction`.
    fn rollback(&self, transaction: TransactionId);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock leaves plain data behind; keep going.
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Debug)]
struct TableState<K, V> {
    committed: HashMap<K, V>,
    staged: HashMap<TransactionId, HashMap<K, Option<V>>>,
}

/// Key/value table with per-transaction staging.
#[derive(Debug)]
pub struct InMemoryTable<K, V> {
    state: Mutex<TableState<K, V>>,
}

impl<K, V> Default for InMemoryTable<K, V> {
    fn default() -> Self {
        Self {
            state: Mutex::new(TableState {
                committed: HashMap::new(),
                staged: HashMap::new(),
            }),
        }
    }
}

impl<K, V> InMemoryTable<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `key`, seeing writes staged under `transaction`.
    pub fn get(&self, transaction: Option<TransactionId>, key: &K) -> Option<V> {
        let state = lock(&self.state);
        let staged = transaction
            .and_then(|tx| state.staged.get(&tx))
            .and_then(|writes| writes.get(key));
        if let Some(entry) = staged {
            return entry.clone();
        }
        state.committed.get(key).cloned()
    }

    /// Writes `value` under `key`; without a transaction the write is
    /// committed immediately.
    pub fn put(&self, transaction: Option<TransactionId>, key: K, value: V) {
        let mut state = lock(&self.state);
        match transaction {
            Some(tx) => {
                state.staged.entry(tx).or_default().insert(key, Some(value));
            }
            None => {
                state.committed.insert(key, value);
            }
        }
    }

    /// Removes `key`, returning whether it was visible before the removal.
    pub fn remove(&self, transaction: Option<TransactionId>, key: &K) -> bool {
        let existed = self.get(transaction, key).is_some();
        let mut state = lock(&self.state);
        match transaction {
            Some(tx) => {
                state.staged.entry(tx).or_default().insert(key.clone(), None);
            }
            None => {
                state.committed.remove(key);
            }
        }
        existed
    }

    /// Number of committed rows.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.state).committed.len()
    }

    /// Returns `true` if no rows are committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> TransactionParticipant for InMemoryTable<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    fn commit(&self, transaction: TransactionId) {
        let mut state = lock(&self.state);
        if let Some(staged) = state.staged.remove(&transaction) {
            for (key, entry) in staged {
                match entry {
                    Some(value) => {
                        state.committed.insert(key, value);
                    }
                    None => {
                        state.committed.remove(&key);
                    }
                }
            }
        }
    }

    fn rollback(&self, transaction: TransactionId) {
        lock(&self.state).staged.remove(&transaction);
    }
}

#[derive(Debug)]
struct UowState<E> {
    transaction: Option<TransactionId>,
    ledger: EventLedger<E>,
}

/// Unit of work coordinating a set of [`InMemoryTable`]s.
pub struct InMemoryUnitOfWork<E> {
    state: Mutex<UowState<E>>,
    participants: Mutex<Vec<Arc<dyn TransactionParticipant>>>,
}

impl<E> Default for InMemoryUnitOfWork<E> {
    fn default() -> Self {
        Self {
            state: Mutex::new(UowState {
                transaction: None,
                ledger: EventLedger::new(),
            }),
            participants: Mutex::new(Vec::new()),
        }
    }
}

impl<E> std::fmt::Debug for InMemoryUnitOfWork<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryUnitOfWork")
            .field("transaction", &lock(&self.state).transaction)
            .field("participants", &lock(&self.participants).len())
            .finish()
    }
}

impl<E> InMemoryUnitOfWork<E> {
    /// Creates a unit of work with no enlisted stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enlists `participant` in every transaction of this unit of work.
    pub fn enlist(&self, participant: Arc<dyn TransactionParticipant>) {
        lock(&self.participants).push(participant);
    }

    fn finish(&self, commit: bool) -> Result<(), DomainError> {
        let mut state = lock(&self.state);
        let transaction = state
            .transaction
            .take()
            .ok_or(DomainError::NoActiveTransaction)?;
        for participant in lock(&self.participants).iter() {
            if commit {
                participant.commit(transaction);
            } else {
                participant.rollback(transaction);
            }
        }
        if commit {
            state.ledger.release();
        } else {
            state.ledger.discard();
        }
        debug!(%transaction, commit, "in-memory transaction finished");
        Ok(())
    }
}

#[async_trait]
impl<E: DomainEvent> UnitOfWork for InMemoryUnitOfWork<E> {
    type Event = E;

    async fn start(&self) -> Result<(), DomainError> {
        let mut state = lock(&self.state);
        if state.transaction.is_none() {
            state.transaction = Some(TransactionId::new());
        }
        Ok(())
    }

    async fn commit(&self) -> Result<(), DomainError> {
        self.finish(true)
    }

    async fn rollback(&self) -> Result<(), DomainError> {
        self.finish(false)
    }

    fn transaction_id(&self) -> Option<TransactionId> {
        lock(&self.state).transaction
    }

    fn track(&self, events: Vec<E>) {
        let mut state = lock(&self.state);
        let in_transaction = state.transaction.is_some();
        state.ledger.record(events, in_transaction);
    }

    fn take_committed_events(&self) -> Vec<E> {
        lock(&self.state).ledger.take_released()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_writes_visible_only_inside_transaction() {
        let table: InMemoryTable<&str, i32> = InMemoryTable::new();
        let tx = TransactionId::new();

        table.put(Some(tx), "a", 1);

        assert_eq!(table.get(Some(tx), &"a"), Some(1));
        assert_eq!(table.get(None, &"a"), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_commit_applies_staged_removal() {
        let table: InMemoryTable<&str, i32> = InMemoryTable::new();
        table.put(None, "a", 1);
        let tx = TransactionId::new();

        let existed = table.remove(Some(tx), &"a");
        assert_eq!(table.get(Some(tx), &"a"), None);
        assert_eq!(table.get(None, &"a"), Some(1));
        table.commit(tx);

        assert!(existed);
        assert_eq!(table.get(None, &"a"), None);
    }

    #[test]
    fn test_rollback_drops_staged_writes() {
        let table: InMemoryTable<&str, i32> = InMemoryTable::new();
        let tx = TransactionId::new();
        table.put(Some(tx), "a", 1);

        table.rollback(tx);

        assert_eq!(table.get(Some(tx), &"a"), None);
        assert_eq!(table.len(), 0);
    }
}
