//! In-memory implementations of the Video context's ports.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use catalog_core::aggregate::AggregateRoot;
use catalog_core::error::DomainError;
use catalog_core::in_memory::{InMemoryTable, InMemoryUnitOfWork};
use catalog_core::unit_of_work::UnitOfWork;

use crate::domain::aggregates::Video;
use crate::domain::events::VideoEvent;
use crate::domain::ids::{CastMemberId, CategoryId, GenreId, VideoId};
use crate::domain::repository::{MediaStorage, ReferenceChecker, VideoRepository};

/// Video repository over an [`InMemoryTable`], enlisted in a unit of work.
#[derive(Debug, Clone)]
pub struct InMemoryVideoRepository {
    uow: Arc<InMemoryUnitOfWork<VideoEvent>>,
    table: Arc<InMemoryTable<VideoId, Video>>,
}

impl InMemoryVideoRepository {
    /// Creates a repository with its own table.
    #[must_use]
    pub fn new(uow: Arc<InMemoryUnitOfWork<VideoEvent>>) -> Self {
        Self::with_table(uow, Arc::new(InMemoryTable::new()))
    }

    /// Creates a repository over a table shared with other units of work.
    #[must_use]
    pub fn with_table(
        uow: Arc<InMemoryUnitOfWork<VideoEvent>>,
        table: Arc<InMemoryTable<VideoId, Video>>,
    ) -> Self {
        uow.enlist(table.clone());
        Self { uow, table }
    }

    /// The backing table.
    #[must_use]
    pub fn table(&self) -> &Arc<InMemoryTable<VideoId, Video>> {
        &self.table
    }

    fn write(&self, video: &mut Video, version: i64) {
        let events = video.drain_events();
        video.set_persisted_version(version);
        self.table
            .put(self.uow.transaction_id(), video.id(), video.clone());
        self.uow.track(events);
    }
}

#[async_trait]
impl VideoRepository for InMemoryVideoRepository {
    async fn insert(&self, video: &mut Video) -> Result<(), DomainError> {
        if self.table.get(self.uow.transaction_id(), &video.id()).is_some() {
            return Err(DomainError::Infrastructure(format!(
                "video {} already exists",
                video.id()
            )));
        }
        self.write(video, 1);
        Ok(())
    }

    async fn update(&self, video: &mut Video) -> Result<(), DomainError> {
        let stored = self
            .table
            .get(self.uow.transaction_id(), &video.id())
            .ok_or_else(|| DomainError::not_found("Video", video.id()))?;
        if stored.version() != video.version() {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: video.aggregate_id(),
                expected: video.version(),
                actual: stored.version(),
            });
        }
        self.write(video, stored.version() + 1);
        Ok(())
    }

    async fn delete(&self, id: VideoId) -> Result<(), DomainError> {
        if self.table.remove(self.uow.transaction_id(), &id) {
            Ok(())
        } else {
            Err(DomainError::not_found("Video", id))
        }
    }

    async fn find_by_id(&self, id: VideoId) -> Result<Option<Video>, DomainError> {
        Ok(self.table.get(self.uow.transaction_id(), &id))
    }
}

/// Reference checker over fixed sets of known ids.
#[derive(Debug, Default)]
pub struct InMemoryReferenceChecker {
    categories: HashSet<CategoryId>,
    genres: HashSet<GenreId>,
    cast_members: HashSet<CastMemberId>,
}

impl InMemoryReferenceChecker {
    /// Creates a checker that knows exactly these ids.
    #[must_use]
    pub fn new(
        categories: impl IntoIterator<Item = CategoryId>,
        genres: impl IntoIterator<Item = GenreId>,
        cast_members: impl IntoIterator<Item = CastMemberId>,
    ) -> Self {
        Self {
            categories: categories.into_iter().collect(),
            genres: genres.into_iter().collect(),
            cast_members: cast_members.into_iter().collect(),
        }
    }
}

fn missing<T: Copy + Eq + std::hash::Hash>(known: &HashSet<T>, ids: &[T]) -> Vec<T> {
    ids.iter().filter(|id| !known.contains(*id)).copied().collect()
}

#[async_trait]
impl ReferenceChecker for InMemoryReferenceChecker {
    async fn missing_categories(&self, ids: &[CategoryId]) -> Result<Vec<CategoryId>, DomainError> {
        Ok(missing(&self.categories, ids))
    }

    async fn missing_genres(&self, ids: &[GenreId]) -> Result<Vec<GenreId>, DomainError> {
        Ok(missing(&self.genres, ids))
    }

    async fn missing_cast_members(
        &self,
        ids: &[CastMemberId],
    ) -> Result<Vec<CastMemberId>, DomainError> {
        Ok(missing(&self.cast_members, ids))
    }
}

/// A stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// File contents.
    pub data: Vec<u8>,
    /// MIME type given at store time.
    pub mime_type: String,
}

/// Media storage keeping files in a map.
#[derive(Debug, Default)]
pub struct InMemoryMediaStorage {
    files: Mutex<HashMap<String, StoredFile>>,
}

impl InMemoryMediaStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn files(&self) -> MutexGuard<'_, HashMap<String, StoredFile>> {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Returns the file stored under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<StoredFile> {
        self.files().get(id).cloned()
    }

    /// Whether a file is stored under `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.files().contains_key(id)
    }

    /// Whether nothing was stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files().is_empty()
    }
}

#[async_trait]
impl MediaStorage for InMemoryMediaStorage {
    async fn store(&self, data: &[u8], id: &str, mime_type: &str) -> Result<(), DomainError> {
        self.files().insert(
            id.to_owned(),
            StoredFile {
                data: data.to_vec(),
                mime_type: mime_type.to_owned(),
            },
        );
        Ok(())
    }
}
