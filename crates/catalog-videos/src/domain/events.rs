//! Domain events for the Video context.

use catalog_core::event::{DomainEvent, EventMetadata};
use serde::{Deserialize, Serialize};

use super::aggregates::Rating;
use super::ids::{CastMemberId, CategoryId, GenreId};
use super::media::{AudioVideoMedia, AudioVideoMediaField};

/// Closed set of Video event names; handlers register against these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoEventName {
    /// See [`VideoCreated`].
    VideoCreated,
    /// See [`VideoMediaReplaced`].
    VideoMediaReplaced,
}

/// Emitted once when a valid video is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCreated {
    /// Title.
    pub title: String,
    /// Year the video was launched.
    pub year_launched: u16,
    /// Duration in minutes.
    pub duration: u32,
    /// Age rating.
    pub rating: Rating,
    /// Whether the video is open to everyone.
    pub is_opened: bool,
    /// Referenced categories.
    pub categories: Vec<CategoryId>,
    /// Referenced genres.
    pub genres: Vec<GenreId>,
    /// Referenced cast members.
    pub cast_members: Vec<CastMemberId>,
}

/// Emitted whenever the trailer or video slot receives a new media value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMediaReplaced {
    /// Which slot was replaced.
    pub field: AudioVideoMediaField,
    /// The new media value.
    pub media: AudioVideoMedia,
}

/// Event payload variants for the Video context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoEventKind {
    /// A video was created.
    VideoCreated(VideoCreated),
    /// An audio/video slot was replaced.
    VideoMediaReplaced(VideoMediaReplaced),
}

/// Domain event envelope for the Video context.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: VideoEventKind,
}

impl DomainEvent for VideoEvent {
    type Name = VideoEventName;

    fn name(&self) -> VideoEventName {
        match &self.kind {
            VideoEventKind::VideoCreated(_) => VideoEventName::VideoCreated,
            VideoEventKind::VideoMediaReplaced(_) => VideoEventName::VideoMediaReplaced,
        }
    }

    fn event_type(&self) -> &'static str {
        match &self.kind {
            VideoEventKind::VideoCreated(_) => "video.created",
            VideoEventKind::VideoMediaReplaced(_) => "video.media_replaced",
        }
    }

    fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(&self.kind).unwrap_or(serde_json::Value::Null)
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}
