//! Consumer for the encoder's media-completion callbacks.
//!
//! Messages arrive on `micro-videos/admin` as
//! `{"video": {"resource_id": "<video id>.<field>", "encoded_video_folder": "...", "status": "COMPLETED"}}`.
//! Each one runs the process-media use case in its own unit of work;
//! failures go through the [`RetryFilter`].

use std::sync::Arc;

use catalog_core::application_service::{ApplicationService, EventDispatcher};
use catalog_core::clock::Clock;
use catalog_core::error::DomainError;
use catalog_messaging::broker::{BrokerChannel, ConsumerTopology, Delivery};
use catalog_messaging::retry::{
    DeliveryState, FilterError, InvocationContext, RetriableError, RetryFilter,
};
use catalog_videos::application::command_handlers::handle_process_audio_video_media;
use catalog_videos::domain::commands::ProcessAudioVideoMedia;
use catalog_videos::domain::events::VideoEvent;
use catalog_videos::domain::ids::VideoId;
use catalog_videos::domain::media::{AudioVideoMediaField, AudioVideoMediaStatus};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::scope::VideoScopeFactory;

/// Queue the consumer reads from.
pub const QUEUE: &str = "micro-videos/admin";
/// Exchange the encoder publishes results to.
pub const EXCHANGE: &str = "amq.direct";
/// Routing key of encoder results.
pub const ROUTING_KEY: &str = "videos.convert.result";
/// Exchange failed deliveries are republished through.
pub const DELAY_EXCHANGE: &str = "direct.delayed";
/// Where rejected deliveries end up.
pub const DEAD_LETTER_QUEUE: &str = "micro-videos/admin.dead-letter";

#[derive(Debug, Deserialize)]
struct MediaConvertedMessage {
    video: ConvertedVideo,
}

#[derive(Debug, Deserialize)]
struct ConvertedVideo {
    resource_id: String,
    encoded_video_folder: String,
    status: String,
}

/// The consumer's queue, bindings and dead-letter queue.
pub const TOPOLOGY: ConsumerTopology = ConsumerTopology {
    queue: QUEUE,
    exchange: EXCHANGE,
    routing_key: ROUTING_KEY,
    delay_exchange: DELAY_EXCHANGE,
    dead_letter_queue: DEAD_LETTER_QUEUE,
};

/// Parses a callback body into the command it asks for.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the body is not a well-formed
/// callback: malformed JSON, a resource id that is not `<uuid>.<field>`,
/// an unknown field, or a status other than `COMPLETED` or `FAILED`.
pub fn parse_message(body: &[u8], correlation_id: Uuid) -> Result<ProcessAudioVideoMedia, DomainError> {
    let message: MediaConvertedMessage = serde_json::from_slice(body)
        .map_err(|e| DomainError::validation("body", format!("malformed callback: {e}")))?;
    let video = message.video;

    let (raw_id, raw_field) = video.resource_id.split_once('.').ok_or_else(|| {
        DomainError::validation("resource_id", "expected <video id>.<field>")
    })?;
    let video_id = raw_id
        .parse::<VideoId>()
        .map_err(|_| DomainError::validation("resource_id", format!("{raw_id} is not a video id")))?;
    let field = raw_field.parse::<AudioVideoMediaField>()?;

    let status = video.status.parse::<AudioVideoMediaStatus>()?;
    if !matches!(
        status,
        AudioVideoMediaStatus::Completed | AudioVideoMediaStatus::Failed
    ) {
        return Err(DomainError::validation(
            "status",
            format!("callback status must be COMPLETED or FAILED, got {status}"),
        ));
    }

    Ok(ProcessAudioVideoMedia {
        correlation_id,
        video_id,
        field,
        encoded_location: video.encoded_video_folder,
        status,
    })
}

/// Applies encoder verdicts delivered by the broker.
pub struct MediaConvertedConsumer {
    channel: Arc<dyn BrokerChannel>,
    scopes: Arc<dyn VideoScopeFactory>,
    dispatcher: EventDispatcher<VideoEvent>,
    clock: Arc<dyn Clock>,
    retry: RetryFilter,
}

impl std::fmt::Debug for MediaConvertedConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaConvertedConsumer")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl MediaConvertedConsumer {
    /// Creates a consumer.
    #[must_use]
    pub fn new(
        channel: Arc<dyn BrokerChannel>,
        scopes: Arc<dyn VideoScopeFactory>,
        dispatcher: EventDispatcher<VideoEvent>,
        clock: Arc<dyn Clock>,
        retry: RetryFilter,
    ) -> Self {
        Self {
            channel,
            scopes,
            dispatcher,
            clock,
            retry,
        }
    }

    /// Processes one delivery and settles it with the broker.
    ///
    /// # Errors
    ///
    /// Returns `FilterError::Unhandled` for programmer errors and
    /// `FilterError::Broker` if the delivery could not be settled.
    #[instrument(
        skip_all,
        fields(
            delivery_tag = delivery.delivery_tag,
            retry_count = delivery.headers.retry_count(),
        )
    )]
    pub async fn handle(&self, delivery: &Delivery) -> Result<DeliveryState, FilterError> {
        match self.process(delivery).await {
            Ok(()) => {
                self.channel.ack(delivery.delivery_tag).await?;
                debug!("media verdict applied");
                Ok(DeliveryState::Delivered)
            }
            Err(cause) => {
                self.retry
                    .catch(
                        RetriableError::from(cause),
                        InvocationContext::Broker(delivery),
                    )
                    .await
            }
        }
    }

    async fn process(&self, delivery: &Delivery) -> Result<(), DomainError> {
        let command = parse_message(&delivery.body, Uuid::new_v4())?;
        debug!(
            video_id = %command.video_id,
            field = %command.field,
            status = %command.status,
            "media verdict received"
        );

        let scope = self.scopes.open();
        let service = ApplicationService::new(scope.uow, self.dispatcher.clone());
        let clock = self.clock.as_ref();
        let repository = scope.repository.as_ref();
        service
            .run(|| handle_process_audio_video_media(&command, clock, repository))
            .await
    }

    /// Consumes deliveries until `shutdown` flips.
    ///
    /// # Errors
    ///
    /// Stops with the first programmer error, or when the broker can no
    /// longer deliver.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), FilterError> {
        info!(queue = QUEUE, "media converted consumer started");
        loop {
            let delivery = tokio::select! {
                delivery = self.channel.next_delivery(QUEUE) => delivery?,
                _ = shutdown.changed() => {
                    info!("media converted consumer stopping");
                    return Ok(());
                }
            };

            match self.handle(&delivery).await {
                Ok(state) => debug!(?state, "delivery settled"),
                Err(FilterError::Broker(err)) => {
                    warn!(error = %err, delivery_tag = delivery.delivery_tag, "delivery left unsettled");
                }
                Err(err) => {
                    error!(error = %err, "media converted consumer stopped");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use catalog_core::aggregate::AggregateRoot;
    use catalog_core::event_manager::DomainEventManager;
    use catalog_messaging::broker::{
        InMemoryBroker, MessageHeaders, OutgoingMessage, RETRY_COUNT_HEADER,
    };
    use catalog_messaging::retry::{DeadLetterReason, RetryPolicy};
    use catalog_test_support::{
        FailingEventHandler, FixedClock, RecordingEventHandler, fixed_now,
    };
    use catalog_videos::domain::aggregates::{CreateVideoProps, Rating, Video};
    use catalog_videos::domain::events::{VideoEventKind, VideoEventName};
    use catalog_videos::domain::ids::{CastMemberId, CategoryId, GenreId};
    use catalog_videos::domain::media::{Trailer, UploadedFile, VideoMedia};

    use super::*;
    use crate::scope::InMemoryVideoScopeFactory;

    struct Fixture {
        broker: Arc<InMemoryBroker>,
        scopes: Arc<InMemoryVideoScopeFactory>,
        consumer: MediaConvertedConsumer,
    }

    fn fixture() -> Fixture {
        fixture_with(DomainEventManager::new())
    }

    fn fixture_with(manager: DomainEventManager<VideoEvent>) -> Fixture {
        let broker = Arc::new(InMemoryBroker::new());
        broker.declare(&TOPOLOGY);
        let scopes = Arc::new(InMemoryVideoScopeFactory::new());
        let (dispatcher, _task) = EventDispatcher::spawn(manager);
        let consumer = MediaConvertedConsumer::new(
            broker.clone(),
            scopes.clone(),
            dispatcher,
            Arc::new(FixedClock(fixed_now())),
            RetryFilter::new(broker.clone(), RetryPolicy::default()),
        );
        Fixture {
            broker,
            scopes,
            consumer,
        }
    }

    fn mp4(name: &str) -> UploadedFile {
        UploadedFile {
            raw_name: name.to_owned(),
            mime_type: "video/mp4".to_owned(),
            data: vec![0; 4],
        }
    }

    /// Stores a video with a completed trailer and a pending full video.
    async fn seed(fx: &Fixture) -> VideoId {
        let clock = FixedClock(fixed_now());
        let mut video = Video::create(
            CreateVideoProps {
                title: "Solaris".to_owned(),
                description: String::new(),
                year_launched: 1972,
                duration: 167,
                rating: Rating::L,
                is_opened: true,
                categories: vec![CategoryId::new()],
                genres: vec![GenreId::new()],
                cast_members: vec![CastMemberId::new()],
            },
            Uuid::new_v4(),
            &clock,
        )
        .unwrap();
        let trailer = Trailer::from_file(&mp4("trailer.mp4"), video.id())
            .unwrap()
            .complete("enc/trailer")
            .unwrap();
        video.replace_trailer(trailer, Uuid::new_v4(), &clock);
        let media = VideoMedia::from_file(&mp4("movie.mp4"), video.id()).unwrap();
        video.replace_video(media, Uuid::new_v4(), &clock);
        fx.scopes.open().repository.insert(&mut video).await.unwrap();
        video.id()
    }

    async fn deliver(fx: &Fixture, body: serde_json::Value, retry_count: Option<u32>) -> Delivery {
        let mut headers = MessageHeaders::new();
        if let Some(count) = retry_count {
            headers.insert(RETRY_COUNT_HEADER, count);
        }
        fx.broker
            .publish(OutgoingMessage {
                exchange: EXCHANGE.to_owned(),
                routing_key: ROUTING_KEY.to_owned(),
                body: serde_json::to_vec(&body).unwrap(),
                headers,
            })
            .await
            .unwrap();
        fx.broker.next_delivery(QUEUE).await.unwrap()
    }

    fn callback(resource_id: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "video": {
                "resource_id": resource_id,
                "encoded_video_folder": "enc/path",
                "status": status,
            }
        })
    }

    async fn stored(fx: &Fixture, id: VideoId) -> Video {
        fx.scopes
            .open()
            .repository
            .find_by_id(id)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_completed_video_publishes_when_trailer_already_completed() {
        // Arrange
        let fx = fixture();
        let id = seed(&fx).await;
        let delivery = deliver(&fx, callback(&format!("{id}.video"), "COMPLETED"), None).await;

        // Act
        let state = fx.consumer.handle(&delivery).await.unwrap();

        // Assert
        assert_eq!(state, DeliveryState::Delivered);
        assert_eq!(fx.broker.acked(), vec![delivery.delivery_tag]);
        let video = stored(&fx, id).await;
        assert!(video.is_published());
        let media = video.video().unwrap().media();
        assert_eq!(media.status(), AudioVideoMediaStatus::Completed);
        assert_eq!(media.encoded_location(), Some("enc/path"));
        assert_eq!(video.version(), 2);
    }

    #[tokio::test]
    async fn test_redelivered_identical_verdict_is_acked_without_change() {
        // Arrange
        let fx = fixture();
        let id = seed(&fx).await;
        let body = callback(&format!("{id}.video"), "COMPLETED");
        let first = deliver(&fx, body.clone(), None).await;
        fx.consumer.handle(&first).await.unwrap();
        let second = deliver(&fx, body, None).await;

        // Act
        let state = fx.consumer.handle(&second).await.unwrap();

        // Assert
        assert_eq!(state, DeliveryState::Delivered);
        assert_eq!(stored(&fx, id).await.version(), 2);
    }

    #[tokio::test]
    async fn test_applied_verdict_dispatches_media_replaced_once() {
        // Arrange
        let recorder = Arc::new(RecordingEventHandler::<VideoEvent>::new());
        let mut manager = DomainEventManager::new();
        manager.register(VideoEventName::VideoMediaReplaced, recorder.clone());
        let fx = fixture_with(manager);
        let id = seed(&fx).await;
        let body = callback(&format!("{id}.video"), "COMPLETED");
        let first = deliver(&fx, body.clone(), None).await;
        let second = deliver(&fx, body, None).await;

        // Act
        fx.consumer.handle(&first).await.unwrap();
        fx.consumer.handle(&second).await.unwrap();

        // Assert
        let received = recorder.received();
        assert_eq!(received.len(), 1);
        match &received[0].kind {
            VideoEventKind::VideoMediaReplaced(replaced) => {
                assert_eq!(replaced.field, AudioVideoMediaField::Video);
                assert_eq!(replaced.media.status(), AudioVideoMediaStatus::Completed);
            }
            other => panic!("expected VideoMediaReplaced, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handler_failure_after_commit_schedules_retry() {
        // Arrange
        let mut manager = DomainEventManager::new();
        manager.register(VideoEventName::VideoMediaReplaced, Arc::new(FailingEventHandler));
        let fx = fixture_with(manager);
        let id = seed(&fx).await;
        let delivery = deliver(&fx, callback(&format!("{id}.video"), "COMPLETED"), None).await;

        // Act
        let state = fx.consumer.handle(&delivery).await.unwrap();

        // Assert
        assert_eq!(state, DeliveryState::RetryScheduled { retry_count: 1 });
        assert_eq!(fx.broker.acked(), vec![delivery.delivery_tag]);
        assert_eq!(fx.broker.queue_len(QUEUE), 1);
        assert!(stored(&fx, id).await.is_published());
    }

    #[tokio::test]
    async fn test_unknown_video_is_dead_lettered_on_first_attempt() {
        // Arrange
        let fx = fixture();
        let delivery = deliver(
            &fx,
            callback(&format!("{}.video", VideoId::new()), "COMPLETED"),
            None,
        )
        .await;

        // Act
        let state = fx.consumer.handle(&delivery).await.unwrap();

        // Assert
        assert_eq!(
            state,
            DeliveryState::DeadLettered {
                reason: DeadLetterReason::NonRetriable
            }
        );
        assert_eq!(fx.broker.queue_len(DEAD_LETTER_QUEUE), 1);
        assert!(fx.broker.acked().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_callback_is_dead_lettered() {
        let fx = fixture();
        let delivery = deliver(&fx, serde_json::json!({"video": "nope"}), None).await;

        let state = fx.consumer.handle(&delivery).await.unwrap();

        assert!(matches!(state, DeliveryState::DeadLettered { .. }));
    }

    #[test]
    fn test_processing_status_is_rejected_as_invalid() {
        let id = VideoId::new();
        let body = serde_json::to_vec(&callback(&format!("{id}.trailer"), "PROCESSING")).unwrap();

        let result = parse_message(&body, Uuid::new_v4());

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_parse_message_splits_resource_id() {
        let id = VideoId::new();
        let body = serde_json::to_vec(&callback(&format!("{id}.trailer"), "FAILED")).unwrap();

        let command = parse_message(&body, Uuid::nil()).unwrap();

        assert_eq!(command.video_id, id);
        assert_eq!(command.field, AudioVideoMediaField::Trailer);
        assert_eq!(command.status, AudioVideoMediaStatus::Failed);
        assert_eq!(command.encoded_location, "enc/path");
    }

    #[test]
    fn test_resource_id_without_field_is_invalid() {
        let body = serde_json::to_vec(&callback("not-a-resource", "COMPLETED")).unwrap();

        let result = parse_message(&body, Uuid::nil());

        match result {
            Err(DomainError::Validation(notification)) => {
                assert!(notification.to_string().contains("resource_id"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let fx = fixture();
        let (tx, rx) = watch::channel(false);

        let run = fx.consumer.run(rx);
        tx.send(true).unwrap();

        assert!(run.await.is_ok());
    }

    #[tokio::test]
    async fn test_run_settles_queued_deliveries() {
        // Arrange
        let fx = fixture();
        let id = seed(&fx).await;
        fx.broker
            .publish(OutgoingMessage {
                exchange: EXCHANGE.to_owned(),
                routing_key: ROUTING_KEY.to_owned(),
                body: serde_json::to_vec(&callback(&format!("{id}.video"), "FAILED")).unwrap(),
                headers: MessageHeaders::new(),
            })
            .await
            .unwrap();
        let (tx, rx) = watch::channel(false);

        // Act
        let consumer = &fx.consumer;
        let broker = fx.broker.clone();
        let stopper = async move {
            while broker.acked().is_empty() {
                tokio::task::yield_now().await;
            }
            tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(consumer.run(rx), stopper);

        // Assert
        assert!(result.is_ok());
        let video = stored(&fx, id).await;
        assert_eq!(
            video.video().unwrap().media().status(),
            AudioVideoMediaStatus::Failed
        );
        assert!(!video.is_published());
    }
}
