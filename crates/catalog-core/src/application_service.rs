//! Application service: runs a use case in a unit of work and dispatches
//! the resulting domain events once the transaction has committed.
//!
//! Dispatch is handed to a dedicated task over a channel. Every batch
//! carries a one-shot acknowledgement that [`ApplicationService::run`]
//! awaits, so by the time `run` returns the handlers for its events have
//! completed, and events from a rolled-back transaction are never sent.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::event_manager::DomainEventManager;
use crate::unit_of_work::{UnitOfWork, run_in_transaction};

const DISPATCH_CHANNEL_CAPACITY: usize = 64;

struct DispatchRequest<E> {
    events: Vec<E>,
    ack: oneshot::Sender<Result<(), DomainError>>,
}

/// Handle to the task that owns the [`DomainEventManager`].
#[derive(Debug)]
pub struct EventDispatcher<E: DomainEvent> {
    sender: mpsc::Sender<DispatchRequest<E>>,
}

impl<E: DomainEvent> Clone for EventDispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E: DomainEvent> EventDispatcher<E> {
    /// Spawns the dispatch task. It stops once every handle is dropped.
    #[must_use]
    pub fn spawn(manager: DomainEventManager<E>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<DispatchRequest<E>>(DISPATCH_CHANNEL_CAPACITY);
        let task = tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                let result = manager.dispatch_all(&request.events).await;
                // The caller may have stopped waiting; nothing left to report to.
                let _ = request.ack.send(result);
            }
            debug!("event dispatcher stopped");
        });
        (Self { sender }, task)
    }

    /// Sends `events` to the dispatch task and waits until every handler
    /// has run.
    ///
    /// # Errors
    ///
    /// Returns the first handler error, or `DomainError::Infrastructure` if
    /// the dispatch task is gone.
    pub async fn dispatch(&self, events: Vec<E>) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }
        let (ack, done) = oneshot::channel();
        self.sender
            .send(DispatchRequest { events, ack })
            .await
            .map_err(|_| DomainError::Infrastructure("event dispatcher is not running".into()))?;
        done.await.map_err(|_| {
            DomainError::Infrastructure("event dispatcher dropped the batch".into())
        })?
    }
}

/// Wraps use cases with transaction handling and post-commit dispatch.
pub struct ApplicationService<U: UnitOfWork + ?Sized> {
    uow: Arc<U>,
    dispatcher: EventDispatcher<U::Event>,
}

impl<U: UnitOfWork + ?Sized> std::fmt::Debug for ApplicationService<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationService")
            .field("transaction", &self.uow.transaction_id())
            .finish_non_exhaustive()
    }
}

impl<U: UnitOfWork + ?Sized> ApplicationService<U> {
    /// Creates a service over the unit of work of one logical operation.
    #[must_use]
    pub fn new(uow: Arc<U>, dispatcher: EventDispatcher<U::Event>) -> Self {
        Self { uow, dispatcher }
    }

    /// The unit of work this service commits.
    #[must_use]
    pub fn unit_of_work(&self) -> &Arc<U> {
        &self.uow
    }

    /// Runs `work` in a transaction, then dispatches the events released by
    /// the commit in the order they were recorded.
    ///
    /// # Errors
    ///
    /// Returns the error from `work` (after rolling back) or from the
    /// transaction itself. A handler failure is reported after the commit;
    /// the written state stays committed.
    #[instrument(skip_all)]
    pub async fn run<T, F, Fut>(&self, work: F) -> Result<T, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let value = run_in_transaction(self.uow.as_ref(), work).await?;

        let events = self.uow.take_committed_events();
        if !events.is_empty() {
            debug!(count = events.len(), "dispatching committed domain events");
            self.dispatcher.dispatch(events).await?;
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::event_manager::DomainEventHandler;
    use crate::in_memory::{InMemoryTable, InMemoryUnitOfWork};
    use crate::testing::{TestEvent, TestEventName};

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
        order: Mutex<Vec<TestEventName>>,
    }

    #[async_trait]
    impl DomainEventHandler<TestEvent> for CountingHandler {
        async fn handle(&self, event: &TestEvent) -> Result<(), DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(event.name);
            Ok(())
        }
    }

    fn service_with(
        handler: &Arc<CountingHandler>,
    ) -> (
        ApplicationService<InMemoryUnitOfWork<TestEvent>>,
        Arc<InMemoryUnitOfWork<TestEvent>>,
        Arc<InMemoryTable<u32, u32>>,
    ) {
        let mut manager = DomainEventManager::new();
        manager.register(TestEventName::Happened, handler.clone());
        manager.register(TestEventName::Other, handler.clone());
        let (dispatcher, _task) = EventDispatcher::spawn(manager);

        let uow = Arc::new(InMemoryUnitOfWork::new());
        let table = Arc::new(InMemoryTable::new());
        uow.enlist(table.clone());
        (ApplicationService::new(uow.clone(), dispatcher), uow, table)
    }

    #[tokio::test]
    async fn test_events_dispatched_once_after_commit() {
        // Arrange
        let handler = Arc::new(CountingHandler::default());
        let (service, uow, table) = service_with(&handler);

        // Act
        service
            .run(|| async {
                table.put(uow.transaction_id(), 1, 10);
                uow.track(vec![
                    TestEvent::new(TestEventName::Happened),
                    TestEvent::new(TestEventName::Other),
                ]);
                // Nothing is dispatched before the commit.
                assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
                Ok(())
            })
            .await
            .unwrap();

        // Assert
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *handler.order.lock().unwrap(),
            vec![TestEventName::Happened, TestEventName::Other]
        );
        assert_eq!(table.get(None, &1), Some(10));
    }

    #[tokio::test]
    async fn test_no_events_dispatched_for_rolled_back_transaction() {
        // Arrange
        let handler = Arc::new(CountingHandler::default());
        let (service, uow, table) = service_with(&handler);

        // Act
        let result: Result<(), DomainError> = service
            .run(|| async {
                table.put(uow.transaction_id(), 1, 10);
                uow.track(vec![TestEvent::new(TestEventName::Happened)]);
                Err(DomainError::validation("title", "required"))
            })
            .await;

        // Assert
        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(table.get(None, &1), None);
    }

    #[tokio::test]
    async fn test_service_is_reusable_after_failure() {
        // Arrange
        let handler = Arc::new(CountingHandler::default());
        let (service, uow, _table) = service_with(&handler);
        let _: Result<(), DomainError> = service
            .run(|| async { Err(DomainError::Infrastructure("boom".into())) })
            .await;

        // Act
        service
            .run(|| async {
                uow.track(vec![TestEvent::new(TestEventName::Other)]);
                Ok(())
            })
            .await
            .unwrap();

        // Assert
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_reports_stopped_dispatcher() {
        let (dispatcher, task) = EventDispatcher::<TestEvent>::spawn(DomainEventManager::new());
        task.abort();
        let _ = task.await;

        let result = dispatcher
            .dispatch(vec![TestEvent::new(TestEventName::Happened)])
            .await;

        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
    }
}
