//! In-process domain event dispatch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::DomainError;
use crate::event::DomainEvent;

/// Reacts to committed domain events.
#[async_trait]
pub trait DomainEventHandler<E: DomainEvent>: Send + Sync {
    /// Handles a single event.
    async fn handle(&self, event: &E) -> Result<(), DomainError>;
}

/// Multicast dispatcher keyed by event name.
pub struct DomainEventManager<E: DomainEvent> {
    handlers: HashMap<E::Name, Vec<Arc<dyn DomainEventHandler<E>>>>,
}

impl<E: DomainEvent> Default for DomainEventManager<E> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<E: DomainEvent> fmt::Debug for DomainEventManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&E::Name, usize> = self
            .handlers
            .iter()
            .map(|(name, handlers)| (name, handlers.len()))
            .collect();
        f.debug_struct("DomainEventManager")
            .field("handlers", &counts)
            .finish()
    }
}

impl<E: DomainEvent> DomainEventManager<E> {
    /// Creates a manager with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events named `name`. Handlers run in
    /// registration order.
    pub fn register(&mut self, name: E::Name, handler: Arc<dyn DomainEventHandler<E>>) {
        self.handlers.entry(name).or_default().push(handler);
    }

    /// Number of handlers registered for `name`.
    #[must_use]
    pub fn handler_count(&self, name: E::Name) -> usize {
        self.handlers.get(&name).map_or(0, Vec::len)
    }

    /// Runs every handler registered for the event's name, one after the
    /// other.
    ///
    /// # Errors
    ///
    /// A failing handler does not stop the ones registered after it; once
    /// all have run, the first error is returned.
    pub async fn dispatch(&self, event: &E) -> Result<(), DomainError> {
        let Some(handlers) = self.handlers.get(&event.name()) else {
            debug!(event_type = event.event_type(), "no handlers registered");
            return Ok(());
        };

        let mut first_error = None;
        for handler in handlers {
            if let Err(err) = handler.handle(event).await {
                warn!(
                    event_type = event.event_type(),
                    event_id = %event.metadata().event_id,
                    error = %err,
                    "domain event handler failed"
                );
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Dispatches `events` in order with the same fail-after-all semantics
    /// as [`DomainEventManager::dispatch`].
    ///
    /// # Errors
    ///
    /// Returns the first handler error seen across the whole batch.
    pub async fn dispatch_all(&self, events: &[E]) -> Result<(), DomainError> {
        let mut first_error = None;
        for event in events {
            if let Err(err) = self.dispatch(event).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
