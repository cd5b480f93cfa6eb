//! SQL statements for the video tables (see `migrations/`).

pub const INSERT_VIDEO: &str = r"
INSERT INTO videos (
    id, title, description, year_launched, duration, rating,
    is_opened, is_published, version, created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
";

/// Compare-and-set on `version`; zero affected rows means the row is gone
/// or moved on.
pub const UPDATE_VIDEO: &str = r"
UPDATE videos
SET title = $3, description = $4, year_launched = $5, duration = $6,
    rating = $7, is_opened = $8, is_published = $9, version = version + 1
WHERE id = $1 AND version = $2
";

pub const SELECT_VIDEO_VERSION: &str = "SELECT version FROM videos WHERE id = $1";

pub const DELETE_VIDEO: &str = "DELETE FROM videos WHERE id = $1";

pub const SELECT_VIDEO: &str = r"
SELECT id, title, description, year_launched, duration, rating,
       is_opened, is_published, version, created_at
FROM videos
WHERE id = $1
";

pub const DELETE_IMAGE_MEDIAS: &str = "DELETE FROM video_image_medias WHERE video_id = $1";

pub const INSERT_IMAGE_MEDIA: &str = r"
INSERT INTO video_image_medias (video_id, video_related_field, name, location)
VALUES ($1, $2, $3, $4)
";

pub const SELECT_IMAGE_MEDIAS: &str = r"
SELECT video_related_field, name, location
FROM video_image_medias
WHERE video_id = $1
";

pub const DELETE_AUDIO_VIDEO_MEDIAS: &str =
    "DELETE FROM video_audio_video_medias WHERE video_id = $1";

pub const INSERT_AUDIO_VIDEO_MEDIA: &str = r"
INSERT INTO video_audio_video_medias (
    video_id, video_related_field, name, raw_location, encoded_location, status
)
VALUES ($1, $2, $3, $4, $5, $6)
";

pub const SELECT_AUDIO_VIDEO_MEDIAS: &str = r"
SELECT video_related_field, name, raw_location, encoded_location, status
FROM video_audio_video_medias
WHERE video_id = $1
";

pub const DELETE_CATEGORIES: &str = "DELETE FROM video_categories WHERE video_id = $1";

pub const INSERT_CATEGORIES: &str = r"
INSERT INTO video_categories (video_id, category_id)
SELECT $1, UNNEST($2::uuid[])
";

pub const SELECT_CATEGORIES: &str =
    "SELECT category_id FROM video_categories WHERE video_id = $1";

pub const DELETE_GENRES: &str = "DELETE FROM video_genres WHERE video_id = $1";

pub const INSERT_GENRES: &str = r"
INSERT INTO video_genres (video_id, genre_id)
SELECT $1, UNNEST($2::uuid[])
";

pub const SELECT_GENRES: &str = "SELECT genre_id FROM video_genres WHERE video_id = $1";

pub const DELETE_CAST_MEMBERS: &str = "DELETE FROM video_cast_members WHERE video_id = $1";

pub const INSERT_CAST_MEMBERS: &str = r"
INSERT INTO video_cast_members (video_id, cast_member_id)
SELECT $1, UNNEST($2::uuid[])
";

pub const SELECT_CAST_MEMBERS: &str =
    "SELECT cast_member_id FROM video_cast_members WHERE video_id = $1";
