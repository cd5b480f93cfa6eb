//! Event fixtures for this crate's unit tests.

use chrono::Utc;
use uuid::Uuid;

use crate::event::{DomainEvent, EventMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TestEventName {
    Happened,
    Other,
}

#[derive(Debug, Clone)]
pub(crate) struct TestEvent {
    pub(crate) name: TestEventName,
    metadata: EventMetadata,
}

impl TestEvent {
    pub(crate) fn new(name: TestEventName) -> Self {
        Self {
            name,
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: format!("{name:?}"),
                aggregate_id: Uuid::new_v4(),
                event_version: 1,
                correlation_id: Uuid::new_v4(),
                occurred_at: Utc::now(),
            },
        }
    }
}

impl DomainEvent for TestEvent {
    type Name = TestEventName;

    fn name(&self) -> TestEventName {
        self.name
    }

    fn event_type(&self) -> &'static str {
        match self.name {
            TestEventName::Happened => "test.happened",
            TestEventName::Other => "test.other",
        }
    }

    fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.event_type() })
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}
