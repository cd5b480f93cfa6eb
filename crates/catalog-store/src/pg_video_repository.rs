//! `PostgreSQL` implementation of the `VideoRepository` trait.

use std::sync::Arc;

use async_trait::async_trait;
use catalog_core::aggregate::AggregateRoot;
use catalog_core::error::DomainError;
use catalog_core::unit_of_work::UnitOfWork;
use catalog_videos::domain::aggregates::{Rating, Video, VideoSnapshot};
use catalog_videos::domain::events::VideoEvent;
use catalog_videos::domain::ids::{CastMemberId, CategoryId, GenreId, VideoId};
use catalog_videos::domain::media::{
    AudioVideoMedia, AudioVideoMediaField, AudioVideoMediaStatus, ImageMedia,
};
use catalog_videos::domain::repository::VideoRepository;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db_error;
use crate::pg_unit_of_work::PgUnitOfWork;
use crate::schema;

#[derive(Debug, sqlx::FromRow)]
struct VideoRow {
    id: Uuid,
    title: String,
    description: String,
    year_launched: i32,
    duration: i32,
    rating: String,
    is_opened: bool,
    is_published: bool,
    version: i64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ImageMediaRow {
    video_related_field: String,
    name: String,
    location: String,
}

#[derive(Debug, sqlx::FromRow)]
struct AudioVideoMediaRow {
    video_related_field: String,
    name: String,
    raw_location: String,
    encoded_location: Option<String>,
    status: String,
}

fn corrupt(video_id: Uuid, column: &str) -> DomainError {
    DomainError::Infrastructure(format!("video {video_id} has an unreadable {column}"))
}

/// PostgreSQL-backed video repository writing through a [`PgUnitOfWork`].
#[derive(Debug, Clone)]
pub struct PgVideoRepository {
    uow: Arc<PgUnitOfWork<VideoEvent>>,
}

impl PgVideoRepository {
    /// Creates a repository bound to `uow`.
    #[must_use]
    pub fn new(uow: Arc<PgUnitOfWork<VideoEvent>>) -> Self {
        Self { uow }
    }

    fn track(&self, video: &mut Video, version: i64) {
        let events = video.drain_events();
        video.set_persisted_version(version);
        self.uow.track(events);
    }
}

fn duration_column(video: &Video) -> Result<i32, DomainError> {
    i32::try_from(video.duration())
        .map_err(|_| DomainError::validation("duration", "duration is out of range"))
}

async fn replace_children(conn: &mut PgConnection, video: &Video) -> Result<(), DomainError> {
    let id = video.id().as_uuid();

    for statement in [
        schema::DELETE_IMAGE_MEDIAS,
        schema::DELETE_AUDIO_VIDEO_MEDIAS,
        schema::DELETE_CATEGORIES,
        schema::DELETE_GENRES,
        schema::DELETE_CAST_MEMBERS,
    ] {
        sqlx::query(statement)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(db_error)?;
    }

    let images = [
        ("banner", video.banner().map(|m| m.media())),
        ("thumbnail", video.thumbnail().map(|m| m.media())),
        ("thumbnail_half", video.thumbnail_half().map(|m| m.media())),
    ];
    for (field, media) in images {
        let Some(media) = media else { continue };
        sqlx::query(schema::INSERT_IMAGE_MEDIA)
            .bind(id)
            .bind(field)
            .bind(media.name())
            .bind(media.location())
            .execute(&mut *conn)
            .await
            .map_err(db_error)?;
    }

    let audio_videos = [
        (
            AudioVideoMediaField::Trailer,
            video.trailer().map(|m| m.media()),
        ),
        (
            AudioVideoMediaField::Video,
            video.video().map(|m| m.media()),
        ),
    ];
    for (field, media) in audio_videos {
        let Some(media) = media else { continue };
        sqlx::query(schema::INSERT_AUDIO_VIDEO_MEDIA)
            .bind(id)
            .bind(field.as_str())
            .bind(media.name())
            .bind(media.raw_location())
            .bind(media.encoded_location())
            .bind(media.status().as_str())
            .execute(&mut *conn)
            .await
            .map_err(db_error)?;
    }

    let categories: Vec<Uuid> = video.categories().iter().map(CategoryId::as_uuid).collect();
    let genres: Vec<Uuid> = video.genres().iter().map(GenreId::as_uuid).collect();
    let cast_members: Vec<Uuid> = video
        .cast_members()
        .iter()
        .map(CastMemberId::as_uuid)
        .collect();
    for (statement, ids) in [
        (schema::INSERT_CATEGORIES, categories),
        (schema::INSERT_GENRES, genres),
        (schema::INSERT_CAST_MEMBERS, cast_members),
    ] {
        sqlx::query(statement)
            .bind(id)
            .bind(ids)
            .execute(&mut *conn)
            .await
            .map_err(db_error)?;
    }

    Ok(())
}

#[async_trait]
impl VideoRepository for PgVideoRepository {
    #[instrument(skip_all, fields(video_id = %video.id()))]
    async fn insert(&self, video: &mut Video) -> Result<(), DomainError> {
        let duration = duration_column(video)?;
        let mut conn = self.uow.connection().await?;

        sqlx::query(schema::INSERT_VIDEO)
            .bind(video.id().as_uuid())
            .bind(video.title())
            .bind(video.description())
            .bind(i32::from(video.year_launched()))
            .bind(duration)
            .bind(video.rating().as_str())
            .bind(video.is_opened())
            .bind(video.is_published())
            .bind(1_i64)
            .bind(video.created_at())
            .execute(&mut *conn)
            .await
            .map_err(db_error)?;
        replace_children(&mut conn, video).await?;
        drop(conn);

        self.track(video, 1);
        debug!("video inserted");
        Ok(())
    }

    #[instrument(skip_all, fields(video_id = %video.id(), version = video.version()))]
    async fn update(&self, video: &mut Video) -> Result<(), DomainError> {
        let duration = duration_column(video)?;
        let id = video.id().as_uuid();
        let mut conn = self.uow.connection().await?;

        let updated = sqlx::query(schema::UPDATE_VIDEO)
            .bind(id)
            .bind(video.version())
            .bind(video.title())
            .bind(video.description())
            .bind(i32::from(video.year_launched()))
            .bind(duration)
            .bind(video.rating().as_str())
            .bind(video.is_opened())
            .bind(video.is_published())
            .execute(&mut *conn)
            .await
            .map_err(db_error)?
            .rows_affected();

        if updated == 0 {
            let actual: Option<i64> = sqlx::query_scalar(schema::SELECT_VIDEO_VERSION)
                .bind(id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_error)?;
            return Err(match actual {
                Some(actual) => DomainError::ConcurrencyConflict {
                    aggregate_id: id,
                    expected: video.version(),
                    actual,
                },
                None => DomainError::not_found("Video", video.id()),
            });
        }

        replace_children(&mut conn, video).await?;
        drop(conn);

        let version = video.version() + 1;
        self.track(video, version);
        debug!(version, "video updated");
        Ok(())
    }

    #[instrument(skip(self), fields(video_id = %id))]
    async fn delete(&self, id: VideoId) -> Result<(), DomainError> {
        let mut conn = self.uow.connection().await?;
        let deleted = sqlx::query(schema::DELETE_VIDEO)
            .bind(id.as_uuid())
            .execute(&mut *conn)
            .await
            .map_err(db_error)?
            .rows_affected();
        if deleted == 0 {
            return Err(DomainError::not_found("Video", id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(video_id = %id))]
    async fn find_by_id(&self, id: VideoId) -> Result<Option<Video>, DomainError> {
        let uuid = id.as_uuid();
        let mut conn = self.uow.connection().await?;

        let Some(row) = sqlx::query_as::<_, VideoRow>(schema::SELECT_VIDEO)
            .bind(uuid)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error)?
        else {
            return Ok(None);
        };

        let images: Vec<ImageMediaRow> = sqlx::query_as(schema::SELECT_IMAGE_MEDIAS)
            .bind(uuid)
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error)?;
        let audio_videos: Vec<AudioVideoMediaRow> =
            sqlx::query_as(schema::SELECT_AUDIO_VIDEO_MEDIAS)
                .bind(uuid)
                .fetch_all(&mut *conn)
                .await
                .map_err(db_error)?;
        let categories: Vec<Uuid> = sqlx::query_scalar(schema::SELECT_CATEGORIES)
            .bind(uuid)
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error)?;
        let genres: Vec<Uuid> = sqlx::query_scalar(schema::SELECT_GENRES)
            .bind(uuid)
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error)?;
        let cast_members: Vec<Uuid> = sqlx::query_scalar(schema::SELECT_CAST_MEMBERS)
            .bind(uuid)
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error)?;
        drop(conn);

        let mut snapshot = VideoSnapshot {
            id: VideoId::from(row.id),
            year_launched: u16::try_from(row.year_launched)
                .map_err(|_| corrupt(uuid, "year_launched"))?,
            duration: u32::try_from(row.duration).map_err(|_| corrupt(uuid, "duration"))?,
            rating: row
                .rating
                .parse::<Rating>()
                .map_err(|_| corrupt(uuid, "rating"))?,
            title: row.title,
            description: row.description,
            is_opened: row.is_opened,
            is_published: row.is_published,
            banner: None,
            thumbnail: None,
            thumbnail_half: None,
            trailer: None,
            video: None,
            categories: categories.into_iter().map(CategoryId::from).collect(),
            genres: genres.into_iter().map(GenreId::from).collect(),
            cast_members: cast_members.into_iter().map(CastMemberId::from).collect(),
            created_at: row.created_at,
            version: row.version,
        };

        for image in images {
            let media = ImageMedia::new(image.name, image.location);
            match image.video_related_field.as_str() {
                "banner" => snapshot.banner = Some(media.into()),
                "thumbnail" => snapshot.thumbnail = Some(media.into()),
                "thumbnail_half" => snapshot.thumbnail_half = Some(media.into()),
                _ => return Err(corrupt(uuid, "image media field")),
            }
        }

        for audio_video in audio_videos {
            let status = audio_video
                .status
                .parse::<AudioVideoMediaStatus>()
                .map_err(|_| corrupt(uuid, "media status"))?;
            let field = audio_video
                .video_related_field
                .parse::<AudioVideoMediaField>()
                .map_err(|_| corrupt(uuid, "audio/video media field"))?;
            let media = AudioVideoMedia::restore(
                audio_video.name,
                audio_video.raw_location,
                audio_video.encoded_location,
                status,
            );
            match field {
                AudioVideoMediaField::Trailer => snapshot.trailer = Some(media.into()),
                AudioVideoMediaField::Video => snapshot.video = Some(media.into()),
            }
        }

        Ok(Some(Video::restore(snapshot)))
    }
}
