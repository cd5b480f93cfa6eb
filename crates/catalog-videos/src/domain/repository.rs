//! Ports the Video context depends on.

use async_trait::async_trait;
use catalog_core::error::DomainError;

use super::aggregates::Video;
use super::ids::{CastMemberId, CategoryId, GenreId, VideoId};

/// Persistence of `Video` aggregates.
///
/// Implementations write through the active unit of work's transaction and
/// hand the aggregate's drained events to that unit of work, so they are
/// only dispatched if the transaction commits.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Stores a new video.
    async fn insert(&self, video: &mut Video) -> Result<(), DomainError>;

    /// Stores changes to an existing video.
    ///
    /// Returns `DomainError::ConcurrencyConflict` if the stored version moved
    /// since `video` was loaded, and `DomainError::NotFound` if it is gone.
    async fn update(&self, video: &mut Video) -> Result<(), DomainError>;

    /// Deletes a video and its media.
    async fn delete(&self, id: VideoId) -> Result<(), DomainError>;

    /// Loads a video.
    async fn find_by_id(&self, id: VideoId) -> Result<Option<Video>, DomainError>;
}

/// Checks that referenced ids exist in their owning contexts.
#[async_trait]
pub trait ReferenceChecker: Send + Sync {
    /// Returns the ids among `ids` that do not exist.
    async fn missing_categories(&self, ids: &[CategoryId]) -> Result<Vec<CategoryId>, DomainError>;

    /// Returns the ids among `ids` that do not exist.
    async fn missing_genres(&self, ids: &[GenreId]) -> Result<Vec<GenreId>, DomainError>;

    /// Returns the ids among `ids` that do not exist.
    async fn missing_cast_members(
        &self,
        ids: &[CastMemberId],
    ) -> Result<Vec<CastMemberId>, DomainError>;
}

/// Object storage for uploaded files.
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Stores `data` under `id`.
    async fn store(&self, data: &[u8], id: &str, mime_type: &str) -> Result<(), DomainError>;
}
