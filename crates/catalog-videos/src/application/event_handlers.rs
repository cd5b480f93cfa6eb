//! Domain event handlers for the Video context.

use std::sync::Arc;

use async_trait::async_trait;
use catalog_core::error::DomainError;
use catalog_core::event_manager::{DomainEventHandler, DomainEventManager};
use catalog_messaging::integration_event::{IntegrationEvent, IntegrationEventName};
use catalog_messaging::queue::IntegrationEventQueue;
use tracing::{debug, instrument};

use crate::domain::events::{VideoEvent, VideoEventKind, VideoEventName};
use crate::domain::media::AudioVideoMediaStatus;

/// Queues a `VideoAudioUploaded` integration event for every freshly
/// uploaded trailer or video, so the encoder picks it up.
///
/// Replacements carrying an encoder verdict are not forwarded.
pub struct PublishVideoMediaReplacedInQueue {
    queue: Arc<dyn IntegrationEventQueue>,
}

impl std::fmt::Debug for PublishVideoMediaReplacedInQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishVideoMediaReplacedInQueue")
            .finish_non_exhaustive()
    }
}

impl PublishVideoMediaReplacedInQueue {
    /// Creates the handler.
    #[must_use]
    pub fn new(queue: Arc<dyn IntegrationEventQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl DomainEventHandler<VideoEvent> for PublishVideoMediaReplacedInQueue {
    #[instrument(skip_all, fields(event_id = %event.metadata.event_id))]
    async fn handle(&self, event: &VideoEvent) -> Result<(), DomainError> {
        let VideoEventKind::VideoMediaReplaced(replaced) = &event.kind else {
            return Ok(());
        };
        if replaced.media.status() != AudioVideoMediaStatus::Pending {
            debug!(status = %replaced.media.status(), "media verdict not forwarded");
            return Ok(());
        }

        let integration_event = IntegrationEvent::new(
            IntegrationEventName::VideoAudioUploaded,
            serde_json::json!({
                "resource_id": format!("{}.{}", event.metadata.aggregate_id, replaced.field),
                "file_path": replaced.media.raw_url(),
            }),
            event.metadata.occurred_at,
        );
        let job_id = self.queue.add(integration_event).await?;
        debug!(%job_id, "integration event queued");
        Ok(())
    }
}

/// Registers the Video context's handlers on `manager`.
pub fn register_video_handlers(
    manager: &mut DomainEventManager<VideoEvent>,
    queue: Arc<dyn IntegrationEventQueue>,
) {
    manager.register(
        VideoEventName::VideoMediaReplaced,
        Arc::new(PublishVideoMediaReplacedInQueue::new(queue)),
    );
}
