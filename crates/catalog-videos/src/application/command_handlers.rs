//! Command handlers for the Video context.
//!
//! Each handler loads the aggregate, executes the command and writes it
//! back through the repository. Handlers are meant to run inside
//! `ApplicationService::run`, which owns the transaction and dispatches the
//! recorded events after commit.

use catalog_core::clock::Clock;
use catalog_core::command::Command;
use catalog_core::error::DomainError;
use catalog_core::notification::Notification;
use tracing::{debug, instrument};

use crate::domain::aggregates::Video;
use crate::domain::commands::{
    CreateVideo, ProcessAudioVideoMedia, UploadAudioVideoMedia, UploadImageMedias,
};
use crate::domain::ids::VideoId;
use crate::domain::media::{
    AudioVideoMedia, AudioVideoMediaField, AudioVideoMediaStatus, Banner, Thumbnail,
    ThumbnailHalf, Trailer, UploadedFile, VideoMedia,
};
use crate::domain::repository::{MediaStorage, ReferenceChecker, VideoRepository};

fn ensure_none_missing<T: ToString>(entity: &'static str, missing: &[T]) -> Result<(), DomainError> {
    if missing.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = missing.iter().map(ToString::to_string).collect();
    Err(DomainError::not_found(entity, ids.join(", ")))
}

async fn load(repo: &dyn VideoRepository, video_id: VideoId) -> Result<Video, DomainError> {
    repo.find_by_id(video_id)
        .await?
        .ok_or_else(|| DomainError::not_found("Video", video_id))
}

/// Handles `CreateVideo`: checks the referenced ids exist, creates the
/// aggregate and inserts it.
///
/// # Errors
///
/// Returns `DomainError::NotFound` listing unknown category, genre or cast
/// member ids, `DomainError::Validation` for invalid input, or the
/// repository's error.
#[instrument(
    skip_all,
    fields(command_type = command.command_type(), correlation_id = %command.correlation_id())
)]
pub async fn handle_create_video(
    command: &CreateVideo,
    clock: &dyn Clock,
    references: &dyn ReferenceChecker,
    repo: &dyn VideoRepository,
) -> Result<VideoId, DomainError> {
    let props = &command.props;
    ensure_none_missing(
        "Category",
        &references.missing_categories(&props.categories).await?,
    )?;
    ensure_none_missing("Genre", &references.missing_genres(&props.genres).await?)?;
    ensure_none_missing(
        "CastMember",
        &references.missing_cast_members(&props.cast_members).await?,
    )?;

    let mut video = Video::create(props.clone(), command.correlation_id, clock)?;
    repo.insert(&mut video).await?;

    debug!(video_id = %video.id(), "video created");
    Ok(video.id())
}

/// Handles `UploadAudioVideoMedia`: validates and stores the file, then
/// replaces the trailer or video slot with a pending media.
///
/// Returns the storage path of the raw file.
///
/// # Errors
///
/// Returns `DomainError::NotFound` if the video does not exist,
/// `DomainError::Validation` for a rejected file, or a storage/repository
/// error.
#[instrument(
    skip_all,
    fields(
        command_type = command.command_type(),
        correlation_id = %command.correlation_id(),
        video_id = %command.video_id,
        field = %command.field
    )
)]
pub async fn handle_upload_audio_video_media(
    command: &UploadAudioVideoMedia,
    clock: &dyn Clock,
    storage: &dyn MediaStorage,
    repo: &dyn VideoRepository,
) -> Result<String, DomainError> {
    let mut video = load(repo, command.video_id).await?;
    let file = &command.file;

    let url = match command.field {
        AudioVideoMediaField::Trailer => {
            let trailer = Trailer::from_file(file, video.id())?;
            let url = trailer.media().raw_url();
            storage.store(&file.data, &url, &file.mime_type).await?;
            video.replace_trailer(trailer, command.correlation_id, clock);
            url
        }
        AudioVideoMediaField::Video => {
            let media = VideoMedia::from_file(file, video.id())?;
            let url = media.media().raw_url();
            storage.store(&file.data, &url, &file.mime_type).await?;
            video.replace_video(media, command.correlation_id, clock);
            url
        }
    };

    repo.update(&mut video).await?;
    Ok(url)
}

fn collect<T>(
    notification: &mut Notification,
    result: Option<Result<T, DomainError>>,
) -> Result<Option<T>, DomainError> {
    match result {
        None => Ok(None),
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(DomainError::Validation(errors))) => {
            notification.copy_errors(&errors);
            Ok(None)
        }
        Some(Err(other)) => Err(other),
    }
}

async fn store(
    storage: &dyn MediaStorage,
    file: Option<&UploadedFile>,
    url: String,
) -> Result<(), DomainError> {
    if let Some(file) = file {
        storage.store(&file.data, &url, &file.mime_type).await?;
    }
    Ok(())
}

/// Handles `UploadImageMedias`: validates every provided image first, then
/// stores them and replaces the matching slots.
///
/// # Errors
///
/// Returns `DomainError::NotFound` if the video does not exist,
/// `DomainError::Validation` listing every rejected file (nothing is stored
/// in that case), or a storage/repository error.
#[instrument(
    skip_all,
    fields(
        command_type = command.command_type(),
        correlation_id = %command.correlation_id(),
        video_id = %command.video_id
    )
)]
pub async fn handle_upload_image_medias(
    command: &UploadImageMedias,
    storage: &dyn MediaStorage,
    repo: &dyn VideoRepository,
) -> Result<(), DomainError> {
    let mut video = load(repo, command.video_id).await?;
    let id = video.id();

    let mut notification = Notification::new();
    let banner = collect(
        &mut notification,
        command.banner.as_ref().map(|f| Banner::from_file(f, id)),
    )?;
    let thumbnail = collect(
        &mut notification,
        command.thumbnail.as_ref().map(|f| Thumbnail::from_file(f, id)),
    )?;
    let thumbnail_half = collect(
        &mut notification,
        command
            .thumbnail_half
            .as_ref()
            .map(|f| ThumbnailHalf::from_file(f, id)),
    )?;
    if notification.has_errors() {
        return Err(DomainError::Validation(notification));
    }

    if let Some(banner) = banner {
        store(storage, command.banner.as_ref(), banner.media().url()).await?;
        video.replace_banner(banner);
    }
    if let Some(thumbnail) = thumbnail {
        store(storage, command.thumbnail.as_ref(), thumbnail.media().url()).await?;
        video.replace_thumbnail(thumbnail);
    }
    if let Some(thumbnail_half) = thumbnail_half {
        store(
            storage,
            command.thumbnail_half.as_ref(),
            thumbnail_half.media().url(),
        )
        .await?;
        video.replace_thumbnail_half(thumbnail_half);
    }

    repo.update(&mut video).await
}

/// Next value of a slot for the encoder's verdict, or `None` when the
/// verdict was already applied.
fn next_media(
    current: &AudioVideoMedia,
    command: &ProcessAudioVideoMedia,
) -> Result<Option<AudioVideoMedia>, DomainError> {
    let already_applied = current.status() == command.status
        && (command.status != AudioVideoMediaStatus::Completed
            || current.encoded_location() == Some(command.encoded_location.as_str()));
    if already_applied {
        return Ok(None);
    }
    let next = match command.status {
        AudioVideoMediaStatus::Completed => current.complete(command.encoded_location.clone())?,
        AudioVideoMediaStatus::Failed => current.fail()?,
        AudioVideoMediaStatus::Processing => current.process()?,
        AudioVideoMediaStatus::Pending => {
            return Err(DomainError::validation(
                "status",
                "the encoder cannot reset a media to PENDING",
            ));
        }
    };
    Ok(Some(next))
}

/// Handles `ProcessAudioVideoMedia`: applies the encoder's verdict to the
/// trailer or video slot. Completing both slots publishes the video.
///
/// Re-delivery of a verdict that was already applied changes nothing.
///
/// # Errors
///
/// Returns `DomainError::NotFound` if the video or the slot is missing,
/// `DomainError::Validation` for an illegal status transition, or the
/// repository's error.
#[instrument(
    skip_all,
    fields(
        command_type = command.command_type(), correlation_id = %command.correlation_id(),
        video_id = %command.video_id,
        field = %command.field,
        status = %command.status
    )
)]
pub async fn handle_process_audio_video_media(
    command: &ProcessAudioVideoMedia,
    clock: &dyn Clock,
    repo: &dyn VideoRepository,
) -> Result<(), DomainError> {
    let mut video = load(repo, command.video_id).await?;

    match command.field {
        AudioVideoMediaField::Trailer => {
            let current = video
                .trailer()
                .ok_or_else(|| DomainError::not_found("Trailer", command.video_id))?;
            let Some(next) = next_media(current.media(), command)? else {
                debug!("media verdict already applied");
                return Ok(());
            };
            video.replace_trailer(Trailer::from(next), command.correlation_id, clock);
        }
        AudioVideoMediaField::Video => {
            let current = video
                .video()
                .ok_or_else(|| DomainError::not_found("VideoMedia", command.video_id))?;
            let Some(next) = next_media(current.media(), command)? else {
                debug!("media verdict already applied");
                return Ok(());
            };
            video.replace_video(VideoMedia::from(next), command.correlation_id, clock);
        }
    }

    repo.update(&mut video).await?;
    debug!(published = video.is_published(), "media verdict applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use catalog_core::aggregate::AggregateRoot;
    use catalog_core::event::DomainEvent;
    use catalog_core::in_memory::InMemoryUnitOfWork;
    use catalog_core::unit_of_work::{UnitOfWork, run_in_transaction};
    use catalog_test_support::{FixedClock, fixed_now};
    use uuid::Uuid;

    use super::*;
    use crate::domain::aggregates::{CreateVideoProps, Rating};
    use crate::domain::events::{VideoEvent, VideoEventKind};
    use crate::domain::ids::{CastMemberId, CategoryId, GenreId};
    use crate::infrastructure::in_memory::{
        InMemoryMediaStorage, InMemoryReferenceChecker, InMemoryVideoRepository,
    };

    struct Fixture {
        uow: Arc<InMemoryUnitOfWork<VideoEvent>>,
        repo: InMemoryVideoRepository,
        references: InMemoryReferenceChecker,
        storage: InMemoryMediaStorage,
        clock: FixedClock,
        props: CreateVideoProps,
    }

    fn fixture() -> Fixture {
        let category = CategoryId::new();
        let genre = GenreId::new();
        let cast_member = CastMemberId::new();
        let uow = Arc::new(InMemoryUnitOfWork::new());
        Fixture {
            repo: InMemoryVideoRepository::new(uow.clone()),
            uow,
            references: InMemoryReferenceChecker::new([category], [genre], [cast_member]),
            storage: InMemoryMediaStorage::new(),
            clock: FixedClock(fixed_now()),
            props: CreateVideoProps {
                title: "Arrival".to_owned(),
                description: "Linguist meets heptapods".to_owned(),
                year_launched: 2016,
                duration: 116,
                rating: Rating::Age12,
                is_opened: true,
                categories: vec![category],
                genres: vec![genre],
                cast_members: vec![cast_member],
            },
        }
    }

    async fn create(fx: &Fixture) -> VideoId {
        let command = CreateVideo {
            correlation_id: Uuid::new_v4(),
            props: fx.props.clone(),
        };
        run_in_transaction(fx.uow.as_ref(), || {
            handle_create_video(&command, &fx.clock, &fx.references, &fx.repo)
        })
        .await
        .unwrap()
    }

    fn mp4(name: &str) -> UploadedFile {
        UploadedFile {
            raw_name: name.to_owned(),
            mime_type: "video/mp4".to_owned(),
            data: vec![1, 2, 3],
        }
    }

    fn verdict(
        video_id: VideoId,
        field: AudioVideoMediaField,
        status: AudioVideoMediaStatus,
    ) -> ProcessAudioVideoMedia {
        ProcessAudioVideoMedia {
            correlation_id: Uuid::new_v4(),
            video_id,
            field,
            encoded_location: format!("enc/{field}"),
            status,
        }
    }

    async fn upload(fx: &Fixture, video_id: VideoId, field: AudioVideoMediaField) -> String {
        let command = UploadAudioVideoMedia {
            correlation_id: Uuid::new_v4(),
            video_id,
            field,
            file: mp4(&format!("{field}.mp4")),
        };
        run_in_transaction(fx.uow.as_ref(), || {
            handle_upload_audio_video_media(&command, &fx.clock, &fx.storage, &fx.repo)
        })
        .await
        .unwrap()
    }

    async fn process(fx: &Fixture, command: &ProcessAudioVideoMedia) -> Result<(), DomainError> {
        run_in_transaction(fx.uow.as_ref(), || {
            handle_process_audio_video_media(command, &fx.clock, &fx.repo)
        })
        .await
    }

    async fn stored(fx: &Fixture, video_id: VideoId) -> Video {
        fx.repo.find_by_id(video_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_handle_create_video_inserts_and_releases_created_event() {
        // Arrange
        let fx = fixture();

        // Act
        let video_id = create(&fx).await;

        // Assert
        let video = stored(&fx, video_id).await;
        assert_eq!(video.title(), "Arrival");
        assert_eq!(video.version(), 1);
        assert!(video.uncommitted_events().is_empty());
        let events = fx.uow.take_committed_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "video.created");
    }

    #[tokio::test]
    async fn test_handle_create_video_rejects_unknown_references() {
        let fx = fixture();
        let mut props = fx.props.clone();
        props.genres.push(GenreId::new());
        let command = CreateVideo {
            correlation_id: Uuid::new_v4(),
            props,
        };

        let result = run_in_transaction(fx.uow.as_ref(), || {
            handle_create_video(&command, &fx.clock, &fx.references, &fx.repo)
        })
        .await;

        match result {
            Err(DomainError::NotFound { entity, .. }) => assert_eq!(entity, "Genre"),
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert!(fx.uow.take_committed_events().is_empty());
    }

    #[tokio::test]
    async fn test_upload_stores_file_and_sets_pending_media() {
        // Arrange
        let fx = fixture();
        let video_id = create(&fx).await;
        fx.uow.take_committed_events();

        // Act
        let url = upload(&fx, video_id, AudioVideoMediaField::Trailer).await;

        // Assert
        assert!(fx.storage.contains(&url));
        let video = stored(&fx, video_id).await;
        let trailer = video.trailer().unwrap().media();
        assert_eq!(trailer.status(), AudioVideoMediaStatus::Pending);
        assert_eq!(trailer.raw_url(), url);
        let events = fx.uow.take_committed_events();
        assert!(matches!(
            &events[..],
            [VideoEvent {
                kind: VideoEventKind::VideoMediaReplaced(_),
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn test_upload_rejects_wrong_file_type_without_storing() {
        let fx = fixture();
        let video_id = create(&fx).await;
        let mut file = mp4("movie.avi");
        file.mime_type = "video/x-msvideo".to_owned();
        let command = UploadAudioVideoMedia {
            correlation_id: Uuid::new_v4(),
            video_id,
            field: AudioVideoMediaField::Video,
            file,
        };

        let result = run_in_transaction(fx.uow.as_ref(), || {
            handle_upload_audio_video_media(&command, &fx.clock, &fx.storage, &fx.repo)
        })
        .await;

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert!(fx.storage.is_empty());
        assert!(stored(&fx, video_id).await.video().is_none());
    }

    #[tokio::test]
    async fn test_upload_image_medias_reports_every_invalid_file() {
        // Arrange
        let fx = fixture();
        let video_id = create(&fx).await;
        let png = UploadedFile {
            raw_name: "banner.png".to_owned(),
            mime_type: "image/png".to_owned(),
            data: vec![0; 16],
        };
        let text = UploadedFile {
            raw_name: "notes.txt".to_owned(),
            mime_type: "text/plain".to_owned(),
            data: vec![0; 16],
        };
        let command = UploadImageMedias {
            correlation_id: Uuid::new_v4(),
            video_id,
            banner: Some(png),
            thumbnail: Some(text.clone()),
            thumbnail_half: Some(text),
        };

        // Act
        let result = run_in_transaction(fx.uow.as_ref(), || {
            handle_upload_image_medias(&command, &fx.storage, &fx.repo)
        })
        .await;

        // Assert
        match result {
            Err(DomainError::Validation(notification)) => {
                assert!(!notification.messages_for("thumbnail").is_empty());
                assert!(!notification.messages_for("thumbnail_half").is_empty());
                assert!(notification.messages_for("banner").is_empty());
            }
            other => panic!("expected Validation, got {other:?}"),
        }
        assert!(fx.storage.is_empty());
        assert!(stored(&fx, video_id).await.banner().is_none());
    }

    #[tokio::test]
    async fn test_upload_image_medias_replaces_slots() {
        let fx = fixture();
        let video_id = create(&fx).await;
        let command = UploadImageMedias {
            correlation_id: Uuid::new_v4(),
            video_id,
            banner: Some(UploadedFile {
                raw_name: "banner.jpg".to_owned(),
                mime_type: "image/jpeg".to_owned(),
                data: vec![0; 4],
            }),
            thumbnail: None,
            thumbnail_half: None,
        };

        run_in_transaction(fx.uow.as_ref(), || {
            handle_upload_image_medias(&command, &fx.storage, &fx.repo)
        })
        .await
        .unwrap();

        let video = stored(&fx, video_id).await;
        let banner = video.banner().unwrap().media();
        assert!(fx.storage.contains(&banner.url()));
        assert!(video.thumbnail().is_none());
    }

    #[tokio::test]
    async fn test_completing_both_slots_publishes_video() {
        // Arrange
        let fx = fixture();
        let video_id = create(&fx).await;
        upload(&fx, video_id, AudioVideoMediaField::Trailer).await;
        upload(&fx, video_id, AudioVideoMediaField::Video).await;

        // Act
        process(
            &fx,
            &verdict(video_id, AudioVideoMediaField::Trailer, AudioVideoMediaStatus::Completed),
        )
        .await
        .unwrap();
        let after_trailer = stored(&fx, video_id).await.is_published();
        process(
            &fx,
            &verdict(video_id, AudioVideoMediaField::Video, AudioVideoMediaStatus::Completed),
        )
        .await
        .unwrap();

        // Assert
        assert!(!after_trailer);
        let video = stored(&fx, video_id).await;
        assert!(video.is_published());
        assert_eq!(video.video().unwrap().media().encoded_location(), Some("enc/video"));
    }

    #[tokio::test]
    async fn test_duplicate_verdict_is_a_no_op() {
        let fx = fixture();
        let video_id = create(&fx).await;
        upload(&fx, video_id, AudioVideoMediaField::Trailer).await;
        let command = verdict(
            video_id,
            AudioVideoMediaField::Trailer,
            AudioVideoMediaStatus::Completed,
        );
        process(&fx, &command).await.unwrap();
        let version = stored(&fx, video_id).await.version();
        fx.uow.take_committed_events();

        process(&fx, &command).await.unwrap();

        assert_eq!(stored(&fx, video_id).await.version(), version);
        assert!(fx.uow.take_committed_events().is_empty());
    }

    #[tokio::test]
    async fn test_verdict_for_empty_slot_is_not_found() {
        let fx = fixture();
        let video_id = create(&fx).await;

        let result = process(
            &fx,
            &verdict(video_id, AudioVideoMediaField::Video, AudioVideoMediaStatus::Completed),
        )
        .await;

        match result {
            Err(DomainError::NotFound { entity, .. }) => assert_eq!(entity, "VideoMedia"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_verdict_for_unknown_video_is_not_found() {
        let fx = fixture();

        let result = process(
            &fx,
            &verdict(VideoId::new(), AudioVideoMediaField::Video, AudioVideoMediaStatus::Failed),
        )
        .await;

        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_completing_a_failed_media_is_rejected() {
        let fx = fixture();
        let video_id = create(&fx).await;
        upload(&fx, video_id, AudioVideoMediaField::Video).await;
        process(
            &fx,
            &verdict(video_id, AudioVideoMediaField::Video, AudioVideoMediaStatus::Failed),
        )
        .await
        .unwrap();

        let result = process(
            &fx,
            &verdict(video_id, AudioVideoMediaField::Video, AudioVideoMediaStatus::Completed),
        )
        .await;

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(
            stored(&fx, video_id).await.video().unwrap().media().status(),
            AudioVideoMediaStatus::Failed
        );
    }
}
