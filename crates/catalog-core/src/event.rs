//! Domain events and their metadata envelope.

use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope fields shared by every domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Identifies this occurrence.
    pub event_id: Uuid,
    /// Type name for logging and serialization routing.
    pub event_type: String,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Schema version of the event payload.
    pub event_version: i32,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// An event raised by an aggregate.
///
/// Every event kind is named by a closed enum (`Name`) so handler
/// registration and dispatch are checked at compile time.
pub trait DomainEvent: Send + Sync + Debug + 'static {
    /// Closed set of event names for this event family.
    type Name: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// Returns the name of this event.
    fn name(&self) -> Self::Name;

    /// Returns the event type name (used for logging and serialization).
    fn event_type(&self) -> &'static str;

    /// Payload as JSON, for logs and persistence.
    fn to_payload(&self) -> serde_json::Value;

    /// Envelope of this event.
    fn metadata(&self) -> &EventMetadata;
}
