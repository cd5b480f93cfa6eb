//! Test handlers — `DomainEventHandler` doubles that record or fail.

use std::sync::Mutex;

use async_trait::async_trait;
use catalog_core::error::DomainError;
use catalog_core::event::DomainEvent;
use catalog_core::event_manager::DomainEventHandler;

/// A handler that records a clone of every event it receives and always
/// succeeds.
#[derive(Debug)]
pub struct RecordingEventHandler<E> {
    received: Mutex<Vec<E>>,
}

impl<E> Default for RecordingEventHandler<E> {
    fn default() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Clone> RecordingEventHandler<E> {
    /// Creates a handler with an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all events received so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn received(&self) -> Vec<E> {
        self.received.lock().unwrap().clone()
    }

    /// Number of events received so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

#[async_trait]
impl<E: DomainEvent + Clone> DomainEventHandler<E> for RecordingEventHandler<E> {
    async fn handle(&self, event: &E) -> Result<(), DomainError> {
        self.received.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// A handler that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventHandler;

#[async_trait]
impl<E: DomainEvent> DomainEventHandler<E> for FailingEventHandler {
    async fn handle(&self, _event: &E) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("handler unavailable".into()))
    }
}
