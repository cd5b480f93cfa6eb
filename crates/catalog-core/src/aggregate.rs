//! Aggregate root abstraction.

use uuid::Uuid;

use crate::event::DomainEvent;
use crate::notification::Notification;

/// Trait for aggregate roots that record domain events as they change.
///
/// Events are appended only by the aggregate's own behavior methods and run
/// through [`AggregateRoot::apply`] so the aggregate can react to them. The
/// buffer is emptied explicitly with [`AggregateRoot::drain_events`] when the
/// aggregate is written through a unit of work.
pub trait AggregateRoot: Send + Sync {
    /// The event type this aggregate produces.
    type Event: DomainEvent;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the persisted version used for optimistic concurrency.
    fn version(&self) -> i64;

    /// Reacts to an event recorded by this aggregate.
    fn apply(&mut self, event: &Self::Event);

    /// Validation messages collected by the aggregate.
    fn notification(&self) -> &Notification;

    /// Returns uncommitted events produced by behavior methods.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Takes all uncommitted events, leaving the buffer empty.
    fn drain_events(&mut self) -> Vec<Self::Event>;
}
