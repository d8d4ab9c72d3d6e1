use course_core::model::{Video, VideoId};

use super::SqliteRepository;
use super::mapping::{db_err, id_i64, map_video_row, video_id_from_i64};
use crate::repository::{NewVideoRecord, StorageError, VideoRepository};

const VIDEO_COLUMNS: &str =
    "id, title, sort_order, is_published, duration_secs, quiz_id, created_at";

#[async_trait::async_trait]
impl VideoRepository for SqliteRepository {
    async fn insert_new_video(&self, video: NewVideoRecord) -> Result<VideoId, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO videos (title, sort_order, is_published, duration_secs, quiz_id, created_at)
            VALUES (?1, ?2, ?3, ?4, NULL, ?5)
            ",
        )
        .bind(video.title)
        .bind(i64::from(video.order))
        .bind(i64::from(video.is_published))
        .bind(i64::from(video.duration_secs))
        .bind(video.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        video_id_from_i64(res.last_insert_rowid())
    }

    async fn update_video(&self, video: &Video) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE videos
            SET title = ?2, sort_order = ?3, is_published = ?4, duration_secs = ?5
            WHERE id = ?1
            ",
        )
        .bind(id_i64("video_id", video.id().value())?)
        .bind(video.title().to_owned())
        .bind(i64::from(video.order()))
        .bind(i64::from(video.is_published()))
        .bind(i64::from(video.duration_secs()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_video(&self, id: VideoId) -> Result<Option<Video>, StorageError> {
        let row = sqlx::query(&format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?1"))
            .bind(id_i64("video_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(map_video_row).transpose()
    }

    async fn list_videos(&self) -> Result<Vec<Video>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos ORDER BY sort_order ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_video_row).collect()
    }

    async fn list_published_videos_ordered(&self) -> Result<Vec<Video>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE is_published = 1 ORDER BY sort_order ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_video_row).collect()
    }

    async fn delete_video(&self, id: VideoId) -> Result<bool, StorageError> {
        // quizzes and their questions go with it through ON DELETE CASCADE
        let res = sqlx::query("DELETE FROM videos WHERE id = ?1")
            .bind(id_i64("video_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(res.rows_affected() > 0)
    }
}
