//! Commands for the Video context.

use catalog_core::command::Command;
use uuid::Uuid;

use super::aggregates::CreateVideoProps;
use super::ids::VideoId;
use super::media::{AudioVideoMediaField, AudioVideoMediaStatus, UploadedFile};

/// Command to create a video.
#[derive(Debug, Clone)]
pub struct CreateVideo {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Initial state of the video.
    pub props: CreateVideoProps,
}

/// Command to upload a trailer or full video file.
#[derive(Debug, Clone)]
pub struct UploadAudioVideoMedia {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Target video.
    pub video_id: VideoId,
    /// Slot to fill.
    pub field: AudioVideoMediaField,
    /// The uploaded file.
    pub file: UploadedFile,
}

/// Command to upload any of the image slots at once.
#[derive(Debug, Clone)]
pub struct UploadImageMedias {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Target video.
    pub video_id: VideoId,
    pub banner: Option<UploadedFile>,
    pub thumbnail: Option<UploadedFile>,
    pub thumbnail_half: Option<UploadedFile>,
}

/// Command recording the encoder's verdict on a trailer or video.
#[derive(Debug, Clone)]
pub struct ProcessAudioVideoMedia {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Target video.
    pub video_id: VideoId,
    /// Slot the encoder worked on.
    pub field: AudioVideoMediaField,
    /// Folder holding the encoded output.
    pub encoded_location: String,
    /// `Completed` or `Failed`.
    pub status: AudioVideoMediaStatus,
}

impl Command for CreateVideo {
    fn command_type(&self) -> &'static str {
        "videos.create_video"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

impl Command for UploadAudioVideoMedia {
    fn command_type(&self) -> &'static str {
        "videos.upload_audio_video_media"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

impl Command for UploadImageMedias {
    fn command_type(&self) -> &'static str {
        "videos.upload_image_medias"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

impl Command for ProcessAudioVideoMedia {
    fn command_type(&self) -> &'static str {
        "videos.process_audio_video_media"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}
