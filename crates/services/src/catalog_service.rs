use std::sync::Arc;

use tracing::info;

use course_core::model::{Quiz, QuizDraft, QuizId, Video, VideoId};
use course_core::time::Clock;
use storage::repository::{
    NewVideoRecord, ProgressRepository, QuizRepository, Storage, StorageError, VideoRepository,
};

use crate::error::CatalogError;

/// Fields for a new catalog video.
#[derive(Debug, Clone)]
pub struct NewVideo {
    pub title: String,
    pub order: u32,
    pub duration_secs: u32,
    pub publish: bool,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct VideoUpdate {
    pub title: Option<String>,
    pub order: Option<u32>,
    pub duration_secs: Option<u32>,
}

/// What deleting a video took with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoRemoval {
    pub video_id: VideoId,
    pub quiz_removed: bool,
    /// Progress records whose completed set referenced the video.
    pub progress_records_cleaned: usize,
}

/// Catalog maintenance: videos and their quizzes.
#[derive(Clone)]
pub struct CatalogService {
    clock: Clock,
    videos: Arc<dyn VideoRepository>,
    quizzes: Arc<dyn QuizRepository>,
    progress: Arc<dyn ProgressRepository>,
}

impl CatalogService {
    #[must_use]
    pub fn new(
        clock: Clock,
        videos: Arc<dyn VideoRepository>,
        quizzes: Arc<dyn QuizRepository>,
        progress: Arc<dyn ProgressRepository>,
    ) -> Self {
        Self {
            clock,
            videos,
            quizzes,
            progress,
        }
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock) -> Self {
        Self::new(
            clock,
            Arc::clone(&storage.videos),
            Arc::clone(&storage.quizzes),
            Arc::clone(&storage.progress),
        )
    }

    //
    // ─── VIDEOS ────────────────────────────────────────────────────────────────
    //

    /// # Errors
    ///
    /// Returns `CatalogError::Video` for an invalid title or order and
    /// `CatalogError::OrderTaken` if another video holds the order.
    pub async fn create_video(&self, new: NewVideo) -> Result<Video, CatalogError> {
        let now = self.clock.now();
        // validates title/order before touching storage; the id is a placeholder
        let draft = Video::new(VideoId::new(0), new.title, new.order, new.duration_secs, now)?;

        let id = self
            .videos
            .insert_new_video(NewVideoRecord {
                title: draft.title().to_owned(),
                order: draft.order(),
                duration_secs: draft.duration_secs(),
                is_published: new.publish,
                created_at: now,
            })
            .await
            .map_err(|e| order_conflict(e, new.order))?;

        info!(video_id = %id, order = new.order, published = new.publish, "video created");
        self.get_video(id).await
    }

    /// # Errors
    ///
    /// Returns `CatalogError::VideoNotFound`, validation errors and
    /// `CatalogError::OrderTaken`.
    pub async fn update_video(
        &self,
        id: VideoId,
        update: VideoUpdate,
    ) -> Result<Video, CatalogError> {
        let mut video = self.get_video(id).await?;
        if let Some(title) = update.title {
            video.rename(title)?;
        }
        if let Some(order) = update.order {
            video.reorder(order)?;
        }
        if let Some(duration) = update.duration_secs {
            video.set_duration(duration);
        }
        self.store_video(&video).await?;
        Ok(video)
    }

    /// # Errors
    ///
    /// Returns `CatalogError::VideoNotFound` and storage errors.
    pub async fn publish_video(&self, id: VideoId) -> Result<Video, CatalogError> {
        self.set_published(id, true).await
    }

    /// # Errors
    ///
    /// Returns `CatalogError::VideoNotFound` and storage errors.
    pub async fn unpublish_video(&self, id: VideoId) -> Result<Video, CatalogError> {
        self.set_published(id, false).await
    }

    /// Delete a video and its quiz, then drop it from every learner's
    /// completed set.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::VideoNotFound` and storage errors.
    pub async fn delete_video(&self, id: VideoId) -> Result<VideoRemoval, CatalogError> {
        let video = self.get_video(id).await?;
        if !self.videos.delete_video(id).await? {
            return Err(CatalogError::VideoNotFound(id));
        }
        let cleaned = self
            .progress
            .forget_video_everywhere(id, self.clock.now())
            .await?;

        info!(
            video_id = %id,
            quiz_removed = video.quiz_id().is_some(),
            progress_records_cleaned = cleaned,
            "video deleted"
        );
        Ok(VideoRemoval {
            video_id: id,
            quiz_removed: video.quiz_id().is_some(),
            progress_records_cleaned: cleaned,
        })
    }

    /// # Errors
    ///
    /// Returns `CatalogError::VideoNotFound` and storage errors.
    pub async fn get_video(&self, id: VideoId) -> Result<Video, CatalogError> {
        self.videos
            .get_video(id)
            .await?
            .ok_or(CatalogError::VideoNotFound(id))
    }

    /// Every video ascending by order, published or not.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn list_videos(&self) -> Result<Vec<Video>, CatalogError> {
        Ok(self.videos.list_videos().await?)
    }

    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn list_published_videos(&self) -> Result<Vec<Video>, CatalogError> {
        Ok(self.videos.list_published_videos_ordered().await?)
    }

    async fn set_published(&self, id: VideoId, published: bool) -> Result<Video, CatalogError> {
        let mut video = self.get_video(id).await?;
        if video.is_published() != published {
            video.set_published(published);
            self.store_video(&video).await?;
            info!(video_id = %id, published, "video visibility changed");
        }
        Ok(video)
    }

    async fn store_video(&self, video: &Video) -> Result<(), CatalogError> {
        self.videos.update_video(video).await.map_err(|e| match e {
            StorageError::NotFound => CatalogError::VideoNotFound(video.id()),
            other => order_conflict(other, video.order()),
        })
    }

    //
    // ─── QUIZZES ───────────────────────────────────────────────────────────────
    //

    /// Validate and attach a quiz to its video.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Quiz` for an invalid definition,
    /// `CatalogError::VideoNotFound` and `CatalogError::QuizExists` when the
    /// video already has one.
    pub async fn create_quiz(&self, draft: QuizDraft) -> Result<Quiz, CatalogError> {
        let video_id = draft.video_id;
        let validated = draft.validate(self.clock.now())?;
        let video = self.get_video(video_id).await?;
        if video.quiz_id().is_some() {
            return Err(CatalogError::QuizExists(video_id));
        }

        let id = self
            .quizzes
            .insert_new_quiz(&validated)
            .await
            .map_err(|e| match e {
                StorageError::NotFound => CatalogError::VideoNotFound(video_id),
                StorageError::Conflict => CatalogError::QuizExists(video_id),
                other => other.into(),
            })?;

        info!(quiz_id = %id, %video_id, "quiz created");
        Ok(validated.assign_id(id))
    }

    /// Replace a quiz definition; moving it to another video moves the pointer.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::QuizNotFound`, validation errors,
    /// `CatalogError::VideoNotFound` and `CatalogError::QuizExists` when the
    /// target video already has another quiz.
    pub async fn update_quiz(&self, id: QuizId, draft: QuizDraft) -> Result<Quiz, CatalogError> {
        let existing = self.get_quiz(id).await?;
        let video_id = draft.video_id;
        let quiz = draft.validate(existing.created_at)?.assign_id(id);

        self.quizzes.update_quiz(&quiz).await.map_err(|e| match e {
            StorageError::NotFound => CatalogError::VideoNotFound(video_id),
            StorageError::Conflict => CatalogError::QuizExists(video_id),
            other => other.into(),
        })?;

        info!(quiz_id = %id, %video_id, "quiz updated");
        Ok(quiz)
    }

    /// # Errors
    ///
    /// Returns `CatalogError::QuizNotFound` and storage errors.
    pub async fn delete_quiz(&self, id: QuizId) -> Result<(), CatalogError> {
        if !self.quizzes.delete_quiz(id).await? {
            return Err(CatalogError::QuizNotFound(id));
        }
        info!(quiz_id = %id, "quiz deleted");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `CatalogError::QuizNotFound` and storage errors.
    pub async fn get_quiz(&self, id: QuizId) -> Result<Quiz, CatalogError> {
        self.quizzes
            .get_quiz(id)
            .await?
            .ok_or(CatalogError::QuizNotFound(id))
    }

    /// # Errors
    ///
    /// Returns `CatalogError::VideoNotFound`, `CatalogError::NoQuiz` and storage errors.
    pub async fn get_quiz_for_video(&self, video_id: VideoId) -> Result<Quiz, CatalogError> {
        self.get_video(video_id).await?;
        self.quizzes
            .get_quiz_for_video(video_id)
            .await?
            .ok_or(CatalogError::NoQuiz(video_id))
    }
}

fn order_conflict(err: StorageError, order: u32) -> CatalogError {
    match err {
        StorageError::Conflict => CatalogError::OrderTaken(order),
        other => other.into(),
    }
}
