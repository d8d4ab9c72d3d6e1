use chrono::{DateTime, Utc};
use course_core::model::{UserId, UserProgress, VideoId};

use super::SqliteRepository;
use super::mapping::{db_err, encode_progress, id_i64, map_progress_row};
use crate::repository::{ProgressRepository, StorageError};

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(&self, user_id: UserId) -> Result<Option<UserProgress>, StorageError> {
        let row = sqlx::query("SELECT version, document FROM user_progress WHERE user_id = ?1")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(map_progress_row).transpose()
    }

    async fn save_progress(&self, progress: &UserProgress) -> Result<u64, StorageError> {
        let document = encode_progress(progress)?;
        let expected = progress.version();
        let next = expected + 1;

        let res = if expected == 0 {
            sqlx::query(
                r"
                INSERT INTO user_progress (user_id, version, document, updated_at)
                VALUES (?1, 1, ?2, ?3)
                ON CONFLICT(user_id) DO NOTHING
                ",
            )
            .bind(progress.user_id().to_string())
            .bind(document)
            .bind(progress.updated_at())
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r"
                UPDATE user_progress
                SET version = ?3, document = ?4, updated_at = ?5
                WHERE user_id = ?1 AND version = ?2
                ",
            )
            .bind(progress.user_id().to_string())
            .bind(id_i64("version", expected)?)
            .bind(id_i64("version", next)?)
            .bind(document)
            .bind(progress.updated_at())
            .execute(&self.pool)
            .await
        }
        .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }
        Ok(next)
    }

    async fn delete_progress(&self, user_id: UserId) -> Result<bool, StorageError> {
        let res = sqlx::query("DELETE FROM user_progress WHERE user_id = ?1")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_progress(&self) -> Result<Vec<UserProgress>, StorageError> {
        let rows = sqlx::query("SELECT version, document FROM user_progress ORDER BY user_id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(map_progress_row).collect()
    }

    async fn forget_video_everywhere(
        &self,
        video_id: VideoId,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        // take the write lock up front: a deferred transaction that reads and
        // then writes fails with BUSY_SNAPSHOT if another writer commits between
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(db_err)?;

        let rows = sqlx::query(
            r"
            SELECT version, document FROM user_progress
            WHERE EXISTS (
                SELECT 1 FROM json_each(user_progress.document, '$.completedVideos')
                WHERE json_each.value = ?1
            )
            ",
        )
        .bind(id_i64("video_id", video_id.value())?)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut changed = 0;
        for row in &rows {
            let mut progress = map_progress_row(row)?;
            if !progress.forget_video(video_id) {
                continue;
            }
            progress.touch(now);
            let version = progress.version();
            sqlx::query(
                r"
                UPDATE user_progress
                SET version = ?3, document = ?4, updated_at = ?5
                WHERE user_id = ?1 AND version = ?2
                ",
            )
            .bind(progress.user_id().to_string())
            .bind(id_i64("version", version)?)
            .bind(id_i64("version", version + 1)?)
            .bind(encode_progress(&progress)?)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            changed += 1;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(changed)
    }
}
