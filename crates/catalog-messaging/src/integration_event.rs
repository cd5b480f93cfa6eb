//! Integration events: broker-safe projections of domain events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MessagingError;

/// Closed set of integration events this service publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntegrationEventName {
    /// A raw trailer or video file was uploaded and awaits encoding.
    #[serde(rename = "VideoAudioUploadedIntegrationEvent")]
    VideoAudioUploaded,
}

impl IntegrationEventName {
    /// Wire name of the event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VideoAudioUploaded => "VideoAudioUploadedIntegrationEvent",
        }
    }
}

impl fmt::Display for IntegrationEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flattened event handed to external consumers through the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationEvent {
    /// Which event this is.
    pub event_name: IntegrationEventName,
    /// Event-specific body.
    pub payload: serde_json::Value,
    /// When the originating domain event happened.
    pub occurred_on: DateTime<Utc>,
    /// Schema version of `payload`.
    pub event_version: i32,
}

impl IntegrationEvent {
    /// Creates a version-1 integration event.
    #[must_use]
    pub fn new(
        event_name: IntegrationEventName,
        payload: serde_json::Value,
        occurred_on: DateTime<Utc>,
    ) -> Self {
        Self {
            event_name,
            payload,
            occurred_on,
            event_version: 1,
        }
    }

    /// Serializes the event for the broker.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::Serialization` if the payload cannot be
    /// encoded.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_test_support::fixed_now;

    #[test]
    fn test_event_serializes_with_wire_name() {
        let event = IntegrationEvent::new(
            IntegrationEventName::VideoAudioUploaded,
            serde_json::json!({ "resource_id": "abc.video", "file_path": "videos/abc/videos/x.mp4" }),
            fixed_now(),
        );

        let json: serde_json::Value = serde_json::from_slice(&event.to_bytes().unwrap()).unwrap();

        assert_eq!(json["event_name"], "VideoAudioUploadedIntegrationEvent");
        assert_eq!(json["event_version"], 1);
        assert_eq!(json["payload"]["resource_id"], "abc.video");
        assert_eq!(json["occurred_on"], "2026-01-15T10:00:00Z");
    }

    #[test]
    fn test_stored_name_matches_serialized_name() {
        let serialized = serde_json::to_value(IntegrationEventName::VideoAudioUploaded).unwrap();

        assert_eq!(serialized, IntegrationEventName::VideoAudioUploaded.as_str());
        assert_eq!(
            IntegrationEventName::VideoAudioUploaded.as_str(),
            "VideoAudioUploadedIntegrationEvent"
        );
    }
}
