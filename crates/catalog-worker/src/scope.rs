//! Per-message unit of work and repository.
//!
//! Every broker message gets a fresh unit of work so transactions and
//! tracked events never leak between messages.

use std::sync::Arc;

use catalog_core::in_memory::{InMemoryTable, InMemoryUnitOfWork};
use catalog_core::unit_of_work::UnitOfWork;
use catalog_store::pg_unit_of_work::PgUnitOfWork;
use catalog_store::pg_video_repository::PgVideoRepository;
use catalog_videos::domain::aggregates::Video;
use catalog_videos::domain::events::VideoEvent;
use catalog_videos::domain::ids::VideoId;
use catalog_videos::domain::repository::VideoRepository;
use catalog_videos::infrastructure::in_memory::InMemoryVideoRepository;
use sqlx::PgPool;

/// A unit of work and the repository writing through it.
pub struct VideoScope {
    /// Transaction boundary of the message.
    pub uow: Arc<dyn UnitOfWork<Event = VideoEvent>>,
    /// Repository bound to `uow`.
    pub repository: Arc<dyn VideoRepository>,
}

/// Opens a [`VideoScope`] per message.
pub trait VideoScopeFactory: Send + Sync {
    /// Creates a fresh scope.
    fn open(&self) -> VideoScope;
}

/// Scopes backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgVideoScopeFactory {
    pool: PgPool,
}

impl PgVideoScopeFactory {
    /// Creates a factory drawing connections from `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl VideoScopeFactory for PgVideoScopeFactory {
    fn open(&self) -> VideoScope {
        let uow = Arc::new(PgUnitOfWork::new(self.pool.clone()));
        VideoScope {
            repository: Arc::new(PgVideoRepository::new(uow.clone())),
            uow,
        }
    }
}

/// Scopes over one shared in-memory table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVideoScopeFactory {
    table: Arc<InMemoryTable<VideoId, Video>>,
}

impl InMemoryVideoScopeFactory {
    /// Creates a factory with an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The table every scope writes to.
    #[must_use]
    pub fn table(&self) -> &Arc<InMemoryTable<VideoId, Video>> {
        &self.table
    }
}

impl VideoScopeFactory for InMemoryVideoScopeFactory {
    fn open(&self) -> VideoScope {
        let uow = Arc::new(InMemoryUnitOfWork::new());
        VideoScope {
            repository: Arc::new(InMemoryVideoRepository::with_table(
                uow.clone(),
                self.table.clone(),
            )),
            uow,
        }
    }
}
