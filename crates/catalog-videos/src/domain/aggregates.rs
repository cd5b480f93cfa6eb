//! Aggregate roots for the Video context.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use catalog_core::aggregate::AggregateRoot;
use catalog_core::clock::Clock;
use catalog_core::error::DomainError;
use catalog_core::event::{DomainEvent, EventMetadata};
use catalog_core::notification::Notification;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{VideoCreated, VideoEvent, VideoEventKind, VideoMediaReplaced};
use super::ids::{CastMemberId, CategoryId, GenreId, VideoId};
use super::media::{Banner, Thumbnail, ThumbnailHalf, Trailer, VideoMedia};

const TITLE_MAX_LENGTH: usize = 255;

/// Age rating of a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rating {
    /// Suitable for all ages.
    #[serde(rename = "L")]
    L,
    /// Ten and older.
    #[serde(rename = "10")]
    Age10,
    /// Twelve and older.
    #[serde(rename = "12")]
    Age12,
    /// Fourteen and older.
    #[serde(rename = "14")]
    Age14,
    /// Sixteen and older.
    #[serde(rename = "16")]
    Age16,
    /// Eighteen and older.
    #[serde(rename = "18")]
    Age18,
}

impl Rating {
    /// Wire/database form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::L => "L",
            Self::Age10 => "10",
            Self::Age12 => "12",
            Self::Age14 => "14",
            Self::Age16 => "16",
            Self::Age18 => "18",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rating {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L" => Ok(Self::L),
            "10" => Ok(Self::Age10),
            "12" => Ok(Self::Age12),
            "14" => Ok(Self::Age14),
            "16" => Ok(Self::Age16),
            "18" => Ok(Self::Age18),
            other => Err(DomainError::validation(
                "rating",
                format!("unknown rating {other}"),
            )),
        }
    }
}

/// Input of [`Video::create`].
#[derive(Debug, Clone)]
pub struct CreateVideoProps {
    /// Title, 1 to 255 characters.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Year the video was launched.
    pub year_launched: u16,
    /// Duration in minutes.
    pub duration: u32,
    /// Age rating.
    pub rating: Rating,
    /// Whether the video is open to everyone.
    pub is_opened: bool,
    /// At least one category.
    pub categories: Vec<CategoryId>,
    /// At least one genre.
    pub genres: Vec<GenreId>,
    /// At least one cast member.
    pub cast_members: Vec<CastMemberId>,
}

/// Persisted state of a video, used by repositories to rebuild it.
#[derive(Debug, Clone)]
pub struct VideoSnapshot {
    pub id: VideoId,
    pub title: String,
    pub description: String,
    pub year_launched: u16,
    pub duration: u32,
    pub rating: Rating,
    pub is_opened: bool,
    pub is_published: bool,
    pub banner: Option<Banner>,
    pub thumbnail: Option<Thumbnail>,
    pub thumbnail_half: Option<ThumbnailHalf>,
    pub trailer: Option<Trailer>,
    pub video: Option<VideoMedia>,
    pub categories: BTreeSet<CategoryId>,
    pub genres: BTreeSet<GenreId>,
    pub cast_members: BTreeSet<CastMemberId>,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

/// The Video aggregate root.
///
/// `published` is derived from the trailer and video slots: it flips to
/// `true` the first time both are completed and never flips back.
#[derive(Debug, Clone)]
pub struct Video {
    id: VideoId,
    title: String,
    description: String,
    year_launched: u16,
    duration: u32,
    rating: Rating,
    is_opened: bool,
    is_published: bool,
    banner: Option<Banner>,
    thumbnail: Option<Thumbnail>,
    thumbnail_half: Option<ThumbnailHalf>,
    trailer: Option<Trailer>,
    video: Option<VideoMedia>,
    categories: BTreeSet<CategoryId>,
    genres: BTreeSet<GenreId>,
    cast_members: BTreeSet<CastMemberId>,
    created_at: DateTime<Utc>,
    version: i64,
    notification: Notification,
    uncommitted_events: Vec<VideoEvent>,
}

impl Video {
    /// Creates a video, recording a `VideoCreated` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the title is empty or too long,
    /// or if any reference set is empty.
    pub fn create(
        props: CreateVideoProps,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        let mut video = Self {
            id: VideoId::new(),
            title: props.title,
            description: props.description,
            year_launched: props.year_launched,
            duration: props.duration,
            rating: props.rating,
            is_opened: props.is_opened,
            is_published: false,
            banner: None,
            thumbnail: None,
            thumbnail_half: None,
            trailer: None,
            video: None,
            categories: props.categories.into_iter().collect(),
            genres: props.genres.into_iter().collect(),
            cast_members: props.cast_members.into_iter().collect(),
            created_at: clock.now(),
            version: 0,
            notification: Notification::new(),
            uncommitted_events: Vec::new(),
        };

        video.validate_title();
        video.validate_references();
        if video.notification.has_errors() {
            return Err(DomainError::Validation(video.notification));
        }

        let created = VideoCreated {
            title: video.title.clone(),
            year_launched: video.year_launched,
            duration: video.duration,
            rating: video.rating,
            is_opened: video.is_opened,
            categories: video.categories.iter().copied().collect(),
            genres: video.genres.iter().copied().collect(),
            cast_members: video.cast_members.iter().copied().collect(),
        };
        video.record(VideoEventKind::VideoCreated(created), correlation_id, clock);
        Ok(video)
    }

    /// Rebuilds a video from persisted state. No event is recorded.
    #[must_use]
    pub fn restore(snapshot: VideoSnapshot) -> Self {
        Self {
            id: snapshot.id,
            title: snapshot.title,
            description: snapshot.description,
            year_launched: snapshot.year_launched,
            duration: snapshot.duration,
            rating: snapshot.rating,
            is_opened: snapshot.is_opened,
            is_published: snapshot.is_published,
            banner: snapshot.banner,
            thumbnail: snapshot.thumbnail,
            thumbnail_half: snapshot.thumbnail_half,
            trailer: snapshot.trailer,
            video: snapshot.video,
            categories: snapshot.categories,
            genres: snapshot.genres,
            cast_members: snapshot.cast_members,
            created_at: snapshot.created_at,
            version: snapshot.version,
            notification: Notification::new(),
            uncommitted_events: Vec::new(),
        }
    }

    /// Aggregate identifier.
    #[must_use]
    pub fn id(&self) -> VideoId {
        self.id
    }

    /// Title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Year the video was launched.
    #[must_use]
    pub fn year_launched(&self) -> u16 {
        self.year_launched
    }

    /// Duration in minutes.
    #[must_use]
    pub fn duration(&self) -> u32 {
        self.duration
    }

    /// Age rating.
    #[must_use]
    pub fn rating(&self) -> Rating {
        self.rating
    }

    /// Whether the video is open to everyone.
    #[must_use]
    pub fn is_opened(&self) -> bool {
        self.is_opened
    }

    /// Whether both trailer and video have been encoded at some point.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.is_published
    }

    #[must_use]
    pub fn banner(&self) -> Option<&Banner> {
        self.banner.as_ref()
    }

    #[must_use]
    pub fn thumbnail(&self) -> Option<&Thumbnail> {
        self.thumbnail.as_ref()
    }

    #[must_use]
    pub fn thumbnail_half(&self) -> Option<&ThumbnailHalf> {
        self.thumbnail_half.as_ref()
    }

    #[must_use]
    pub fn trailer(&self) -> Option<&Trailer> {
        self.trailer.as_ref()
    }

    #[must_use]
    pub fn video(&self) -> Option<&VideoMedia> {
        self.video.as_ref()
    }

    #[must_use]
    pub fn categories(&self) -> &BTreeSet<CategoryId> {
        &self.categories
    }

    #[must_use]
    pub fn genres(&self) -> &BTreeSet<GenreId> {
        &self.genres
    }

    #[must_use]
    pub fn cast_members(&self) -> &BTreeSet<CastMemberId> {
        &self.cast_members
    }

    /// Creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Records the version a repository just stored.
    pub fn set_persisted_version(&mut self, version: i64) {
        self.version = version;
    }

    /// Changes the title.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the title is empty or longer
    /// than 255 characters; the video keeps its previous title and carries no
    /// title error afterwards.
    pub fn change_title(&mut self, title: impl Into<String>) -> Result<(), DomainError> {
        let previous = std::mem::replace(&mut self.title, title.into());
        self.validate_title();
        if self.notification.has_errors() {
            let rejected = self.notification.clone();
            self.title = previous;
            self.validate_title();
            return Err(DomainError::Validation(rejected));
        }
        Ok(())
    }

    pub fn change_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn change_year_launched(&mut self, year_launched: u16) {
        self.year_launched = year_launched;
    }

    pub fn change_duration(&mut self, duration: u32) {
        self.duration = duration;
    }

    pub fn change_rating(&mut self, rating: Rating) {
        self.rating = rating;
    }

    pub fn mark_as_opened(&mut self) {
        self.is_opened = true;
    }

    pub fn mark_as_not_opened(&mut self) {
        self.is_opened = false;
    }

    pub fn replace_banner(&mut self, banner: Banner) {
        self.banner = Some(banner);
    }

    pub fn replace_thumbnail(&mut self, thumbnail: Thumbnail) {
        self.thumbnail = Some(thumbnail);
    }

    pub fn replace_thumbnail_half(&mut self, thumbnail_half: ThumbnailHalf) {
        self.thumbnail_half = Some(thumbnail_half);
    }

    /// Swaps in a new trailer, recording a `VideoMediaReplaced` event.
    pub fn replace_trailer(&mut self, trailer: Trailer, correlation_id: Uuid, clock: &dyn Clock) {
        let media = trailer.media().clone();
        self.trailer = Some(trailer);
        self.record(
            VideoEventKind::VideoMediaReplaced(VideoMediaReplaced {
                field: Trailer::FIELD,
                media,
            }),
            correlation_id,
            clock,
        );
    }

    /// Swaps in a new video media, recording a `VideoMediaReplaced` event.
    pub fn replace_video(&mut self, video: VideoMedia, correlation_id: Uuid, clock: &dyn Clock) {
        let media = video.media().clone();
        self.video = Some(video);
        self.record(
            VideoEventKind::VideoMediaReplaced(VideoMediaReplaced {
                field: VideoMedia::FIELD,
                media,
            }),
            correlation_id,
            clock,
        );
    }

    pub fn add_category(&mut self, id: CategoryId) {
        self.categories.insert(id);
    }

    /// # Errors
    ///
    /// Returns `DomainError::Validation` when removing the last category.
    pub fn remove_category(&mut self, id: CategoryId) -> Result<(), DomainError> {
        remove_reference(&mut self.categories, &id, "categories")
    }

    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `ids` is empty.
    pub fn sync_categories(&mut self, ids: Vec<CategoryId>) -> Result<(), DomainError> {
        sync_references(&mut self.categories, ids, "categories")
    }

    pub fn add_genre(&mut self, id: GenreId) {
        self.genres.insert(id);
    }

    /// # Errors
    ///
    /// Returns `DomainError::Validation` when removing the last genre.
    pub fn remove_genre(&mut self, id: GenreId) -> Result<(), DomainError> {
        remove_reference(&mut self.genres, &id, "genres")
    }

    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `ids` is empty.
    pub fn sync_genres(&mut self, ids: Vec<GenreId>) -> Result<(), DomainError> {
        sync_references(&mut self.genres, ids, "genres")
    }

    pub fn add_cast_member(&mut self, id: CastMemberId) {
        self.cast_members.insert(id);
    }

    /// # Errors
    ///
    /// Returns `DomainError::Validation` when removing the last cast member.
    pub fn remove_cast_member(&mut self, id: CastMemberId) -> Result<(), DomainError> {
        remove_reference(&mut self.cast_members, &id, "cast_members")
    }

    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `ids` is empty.
    pub fn sync_cast_members(&mut self, ids: Vec<CastMemberId>) -> Result<(), DomainError> {
        sync_references(&mut self.cast_members, ids, "cast_members")
    }

    fn validate_title(&mut self) {
        self.notification.clear_field("title");
        let length = self.title.chars().count();
        if length == 0 {
            self.notification.add_error("title", "title is required");
        } else if length > TITLE_MAX_LENGTH {
            self.notification.add_error(
                "title",
                format!("title must be at most {TITLE_MAX_LENGTH} characters"),
            );
        }
    }

    fn validate_references(&mut self) {
        for (field, empty) in [
            ("categories", self.categories.is_empty()),
            ("genres", self.genres.is_empty()),
            ("cast_members", self.cast_members.is_empty()),
        ] {
            self.notification.clear_field(field);
            if empty {
                self.notification
                    .add_error(field, format!("{field} must not be empty"));
            }
        }
    }

    fn record(&mut self, kind: VideoEventKind, correlation_id: Uuid, clock: &dyn Clock) {
        let mut event = VideoEvent {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: String::new(),
                aggregate_id: self.id.as_uuid(),
                event_version: 1,
                correlation_id,
                occurred_at: clock.now(),
            },
            kind,
        };
        event.metadata.event_type = event.event_type().to_owned();
        self.apply(&event);
        self.uncommitted_events.push(event);
    }
}

fn remove_reference<T: Ord>(
    set: &mut BTreeSet<T>,
    id: &T,
    field: &str,
) -> Result<(), DomainError> {
    if set.len() == 1 && set.contains(id) {
        return Err(DomainError::validation(
            field,
            format!("{field} must not be empty"),
        ));
    }
    set.remove(id);
    Ok(())
}

fn sync_references<T: Ord>(
    set: &mut BTreeSet<T>,
    ids: Vec<T>,
    field: &str,
) -> Result<(), DomainError> {
    if ids.is_empty() {
        return Err(DomainError::validation(
            field,
            format!("{field} must not be empty"),
        ));
    }
    *set = ids.into_iter().collect();
    Ok(())
}

impl AggregateRoot for Video {
    type Event = VideoEvent;

    fn aggregate_id(&self) -> Uuid {
        self.id.as_uuid()
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &Self::Event) {
        match &event.kind {
            VideoEventKind::VideoCreated(_) => {}
            VideoEventKind::VideoMediaReplaced(_) => {
                let trailer_done = self.trailer.as_ref().is_some_and(|t| t.media().is_completed());
                let video_done = self.video.as_ref().is_some_and(|v| v.media().is_completed());
                if trailer_done && video_done {
                    self.is_published = true;
                }
            }
        }
    }

    fn notification(&self) -> &Notification {
        &self.notification
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn drain_events(&mut self) -> Vec<Self::Event> {
        std::mem::take(&mut self.uncommitted_events)
    }
}
