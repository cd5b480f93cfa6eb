//! Media value objects.
//!
//! Media values are immutable: a status change produces a new value which
//! the aggregate swaps into its slot.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use catalog_core::error::DomainError;
use catalog_core::notification::Notification;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ids::VideoId;

const MIB: u64 = 1024 * 1024;

const IMAGE_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif"];
const VIDEO_MIME_TYPES: &[&str] = &["video/mp4"];

/// A file received from an upload, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Name the client sent.
    pub raw_name: String,
    /// Declared MIME type.
    pub mime_type: String,
    /// File contents.
    pub data: Vec<u8>,
}

impl UploadedFile {
    /// Size of the file in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

struct FileRules {
    field: &'static str,
    max_size: u64,
    mime_types: &'static [&'static str],
}

impl FileRules {
    fn validate(&self, file: &UploadedFile) -> Result<(), DomainError> {
        let mut notification = Notification::new();
        if file.size() > self.max_size {
            notification.add_error(
                self.field,
                format!("file is larger than {} bytes", self.max_size),
            );
        }
        if !self.mime_types.contains(&file.mime_type.as_str()) {
            notification.add_error(
                self.field,
                format!(
                    "invalid mime type {}, expected one of {}",
                    file.mime_type,
                    self.mime_types.join(", ")
                ),
            );
        }
        if notification.has_errors() {
            return Err(DomainError::Validation(notification));
        }
        Ok(())
    }
}

/// Stored name of an upload: SHA-256 of the raw name, keeping the extension.
fn hashed_name(raw_name: &str) -> String {
    let digest = Sha256::digest(raw_name.as_bytes());
    let mut name = String::with_capacity(72);
    for byte in digest {
        let _ = write!(name, "{byte:02x}");
    }
    match raw_name.rsplit_once('.') {
        Some((_, extension)) if !extension.is_empty() => {
            name.push('.');
            name.push_str(extension);
        }
        _ => {}
    }
    name
}

fn image_location(video_id: VideoId) -> String {
    format!("videos/{video_id}/images")
}

fn video_location(video_id: VideoId) -> String {
    format!("videos/{video_id}/videos")
}

/// An image stored for a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMedia {
    name: String,
    location: String,
}

impl ImageMedia {
    /// Creates an image descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }

    /// Stored (checksum) name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Folder the image is stored in.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Full storage path.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}/{}", self.location, self.name)
    }
}

/// Processing status of an audio/video media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioVideoMediaStatus {
    /// Raw file stored, waiting for the encoder.
    Pending,
    /// The encoder picked it up.
    Processing,
    /// Encoded output is available.
    Completed,
    /// Encoding failed.
    Failed,
}

impl AudioVideoMediaStatus {
    /// Wire/database form of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for AudioVideoMediaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioVideoMediaStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(DomainError::validation(
                "status",
                format!("unknown media status {other}"),
            )),
        }
    }
}

/// An audio/video file and its encoding progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioVideoMedia {
    name: String,
    raw_location: String,
    encoded_location: Option<String>,
    status: AudioVideoMediaStatus,
}

impl AudioVideoMedia {
    /// A freshly uploaded, not yet encoded media.
    #[must_use]
    pub fn pending(name: impl Into<String>, raw_location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            raw_location: raw_location.into(),
            encoded_location: None,
            status: AudioVideoMediaStatus::Pending,
        }
    }

    /// Rebuilds a media read back from storage.
    #[must_use]
    pub fn restore(
        name: String,
        raw_location: String,
        encoded_location: Option<String>,
        status: AudioVideoMediaStatus,
    ) -> Self {
        Self {
            name,
            raw_location,
            encoded_location,
            status,
        }
    }

    /// Stored (checksum) name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Folder the raw upload is stored in.
    #[must_use]
    pub fn raw_location(&self) -> &str {
        &self.raw_location
    }

    /// Where the encoder put its output, once completed.
    #[must_use]
    pub fn encoded_location(&self) -> Option<&str> {
        self.encoded_location.as_deref()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> AudioVideoMediaStatus {
        self.status
    }

    /// Full storage path of the raw upload.
    #[must_use]
    pub fn raw_url(&self) -> String {
        format!("{}/{}", self.raw_location, self.name)
    }

    /// Whether encoding completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == AudioVideoMediaStatus::Completed
    }

    fn transition(&self, to: AudioVideoMediaStatus) -> Result<Self, DomainError> {
        let allowed = match to {
            AudioVideoMediaStatus::Processing => self.status == AudioVideoMediaStatus::Pending,
            AudioVideoMediaStatus::Completed | AudioVideoMediaStatus::Failed => {
                !self.status.is_terminal()
            }
            AudioVideoMediaStatus::Pending => false,
        };
        if !allowed {
            return Err(DomainError::validation(
                "status",
                format!("cannot move media from {} to {to}", self.status),
            ));
        }
        Ok(Self {
            status: to,
            ..self.clone()
        })
    }

    /// Marks the media as being encoded.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` unless the media is pending.
    pub fn process(&self) -> Result<Self, DomainError> {
        self.transition(AudioVideoMediaStatus::Processing)
    }

    /// Records the encoder's output location.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the media already reached a
    /// terminal status.
    pub fn complete(&self, encoded_location: impl Into<String>) -> Result<Self, DomainError> {
        let mut completed = self.transition(AudioVideoMediaStatus::Completed)?;
        completed.encoded_location = Some(encoded_location.into());
        Ok(completed)
    }

    /// Marks encoding as failed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the media already reached a
    /// terminal status.
    pub fn fail(&self) -> Result<Self, DomainError> {
        self.transition(AudioVideoMediaStatus::Failed)
    }
}

/// Which audio/video slot of a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioVideoMediaField {
    /// The trailer slot.
    Trailer,
    /// The full video slot.
    Video,
}

impl AudioVideoMediaField {
    /// Field name as used in resource ids.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trailer => "trailer",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for AudioVideoMediaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioVideoMediaField {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trailer" => Ok(Self::Trailer),
            "video" => Ok(Self::Video),
            other => Err(DomainError::validation(
                "field",
                format!("unknown media field {other}"),
            )),
        }
    }
}

macro_rules! image_slot {
    ($(#[$meta:meta])* $name:ident, $field:literal, $max_size:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(ImageMedia);

        impl $name {
            const RULES: FileRules = FileRules {
                field: $field,
                max_size: $max_size,
                mime_types: IMAGE_MIME_TYPES,
            };

            /// Validates an upload and derives its stored name and location.
            ///
            /// # Errors
            ///
            /// Returns `DomainError::Validation` if the file is too large or
            /// of a disallowed type.
            pub fn from_file(file: &UploadedFile, video_id: VideoId) -> Result<Self, DomainError> {
                Self::RULES.validate(file)?;
                Ok(Self(ImageMedia::new(
                    hashed_name(&file.raw_name),
                    image_location(video_id),
                )))
            }

            /// The underlying image.
            #[must_use]
            pub fn media(&self) -> &ImageMedia {
                &self.0
            }
        }

        impl From<ImageMedia> for $name {
            fn from(media: ImageMedia) -> Self {
                Self(media)
            }
        }
    };
}

image_slot!(
    /// Wide banner image.
    Banner,
    "banner",
    2 * MIB
);
image_slot!(
    /// Thumbnail image.
    Thumbnail,
    "thumbnail",
    2 * MIB
);
image_slot!(
    /// Half-size thumbnail image.
    ThumbnailHalf,
    "thumbnail_half",
    2 * MIB
);

macro_rules! audio_video_slot {
    ($(#[$meta:meta])* $name:ident, $field:expr, $max_size:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(AudioVideoMedia);

        impl $name {
            /// Slot this media belongs in.
            pub const FIELD: AudioVideoMediaField = $field;

            const RULES: FileRules = FileRules {
                field: $field.as_str(),
                max_size: $max_size,
                mime_types: VIDEO_MIME_TYPES,
            };

            /// Validates an upload; the result is pending encoding.
            ///
            /// # Errors
            ///
            /// Returns `DomainError::Validation` if the file is too large or
            /// of a disallowed type.
            pub fn from_file(file: &UploadedFile, video_id: VideoId) -> Result<Self, DomainError> {
                Self::RULES.validate(file)?;
                Ok(Self(AudioVideoMedia::pending(
                    hashed_name(&file.raw_name),
                    video_location(video_id),
                )))
            }

            /// The underlying media.
            #[must_use]
            pub fn media(&self) -> &AudioVideoMedia {
                &self.0
            }

            /// See [`AudioVideoMedia::process`].
            ///
            /// # Errors
            ///
            /// Returns `DomainError::Validation` unless the media is pending.
            pub fn process(&self) -> Result<Self, DomainError> {
                self.0.process().map(Self)
            }

            /// See [`AudioVideoMedia::complete`].
            ///
            /// # Errors
            ///
            /// Returns `DomainError::Validation` from a terminal status.
            pub fn complete(&self, encoded_location: impl Into<String>) -> Result<Self, DomainError> {
                self.0.complete(encoded_location).map(Self)
            }

            /// See [`AudioVideoMedia::fail`].
            ///
            /// # Errors
            ///
            /// Returns `DomainError::Validation` from a terminal status.
            pub fn fail(&self) -> Result<Self, DomainError> {
                self.0.fail().map(Self)
            }
        }

        impl From<AudioVideoMedia> for $name {
            fn from(media: AudioVideoMedia) -> Self {
                Self(media)
            }
        }
    };
}

audio_video_slot!(
    /// Trailer of a video.
    Trailer,
    AudioVideoMediaField::Trailer,
    500 * MIB
);
audio_video_slot!(
    /// The full video.
    VideoMedia,
    AudioVideoMediaField::Video,
    50 * 1024 * MIB
);
