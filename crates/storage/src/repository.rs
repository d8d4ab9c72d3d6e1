use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{
    Quiz, QuizId, User, UserId, UserProgress, ValidatedQuiz, Video, VideoId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// Unique constraint hit, or a conditional write lost against another writer.
    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Fields needed to create a video; the id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewVideoRecord {
    pub title: String,
    pub order: u32,
    pub duration_secs: u32,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Catalog videos. Reads are lock-free from the engine's point of view.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Insert a video and return its id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if another video already holds `order`.
    async fn insert_new_video(&self, video: NewVideoRecord) -> Result<VideoId, StorageError>;

    /// Persist changes to an existing video. The quiz pointer is left as
    /// stored; only quiz writes move it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, `StorageError::Conflict` if
    /// the order collides with another video.
    async fn update_video(&self, video: &Video) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns storage errors only; a missing video is `Ok(None)`.
    async fn get_video(&self, id: VideoId) -> Result<Option<Video>, StorageError>;

    /// Every video, published or not, ascending by order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_videos(&self) -> Result<Vec<Video>, StorageError>;

    /// Published videos ascending by order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_published_videos_ordered(&self) -> Result<Vec<Video>, StorageError>;

    /// Delete a video together with its quiz. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn delete_video(&self, id: VideoId) -> Result<bool, StorageError>;
}

/// Quiz definitions. Writes keep the video's reverse pointer in step.
#[async_trait]
pub trait QuizRepository: Send + Sync {
    /// Insert a quiz and point its video at it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the video is missing and
    /// `StorageError::Conflict` if the video already has a quiz.
    async fn insert_new_quiz(&self, quiz: &ValidatedQuiz) -> Result<QuizId, StorageError>;

    /// Replace a quiz definition, moving the reverse pointer if the video changed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the quiz or target video is missing and
    /// `StorageError::Conflict` if the target video already has another quiz.
    async fn update_quiz(&self, quiz: &Quiz) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns storage errors only; a missing quiz is `Ok(None)`.
    async fn get_quiz(&self, id: QuizId) -> Result<Option<Quiz>, StorageError>;

    /// # Errors
    ///
    /// Returns storage errors only; a video without quiz is `Ok(None)`.
    async fn get_quiz_for_video(&self, video_id: VideoId) -> Result<Option<Quiz>, StorageError>;

    /// Delete a quiz and clear its video's pointer. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn delete_quiz(&self, id: QuizId) -> Result<bool, StorageError>;
}

/// One progress document per user, written with optimistic concurrency.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch a user's record, carrying the version it was read at.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure or an unreadable document.
    async fn get_progress(&self, user_id: UserId) -> Result<Option<UserProgress>, StorageError>;

    /// Conditional write. Version 0 means "insert, must not exist yet"; any
    /// other version must match the stored one. Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if another writer got there first.
    async fn save_progress(&self, progress: &UserProgress) -> Result<u64, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn delete_progress(&self, user_id: UserId) -> Result<bool, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure or an unreadable document.
    async fn list_progress(&self) -> Result<Vec<UserProgress>, StorageError>;

    /// Remove `video_id` from every record's completed set. Returns how many
    /// records changed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn forget_video_everywhere(
        &self,
        video_id: VideoId,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError>;
}

/// The account slice the engine needs: identity and role.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the id or email is taken.
    async fn insert_user(&self, user: &User) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns storage errors only; a missing user is `Ok(None)`.
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError>;

    /// # Errors
    ///
    /// Returns storage errors only; a missing user is `Ok(None)`.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;

    /// Delete a user and, with it, their progress record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn delete_user(&self, id: UserId) -> Result<bool, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_user_ids(&self) -> Result<Vec<UserId>, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct CatalogState {
    videos: HashMap<VideoId, Video>,
    quizzes: HashMap<QuizId, Quiz>,
    next_video: u64,
    next_quiz: u64,
}

impl CatalogState {
    fn order_taken(&self, order: u32, except: Option<VideoId>) -> bool {
        self.videos
            .values()
            .any(|v| v.order() == order && Some(v.id()) != except)
    }
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    catalog: Arc<Mutex<CatalogState>>,
    progress: Arc<Mutex<HashMap<UserId, UserProgress>>>,
    users: Arc<Mutex<HashMap<UserId, User>>>,
}

fn guard<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    m.lock().map_err(|e| StorageError::Connection(e.to_string()))
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VideoRepository for InMemoryRepository {
    async fn insert_new_video(&self, video: NewVideoRecord) -> Result<VideoId, StorageError> {
        let mut state = guard(&self.catalog)?;
        if state.order_taken(video.order, None) {
            return Err(StorageError::Conflict);
        }
        state.next_video += 1;
        let id = VideoId::new(state.next_video);
        let built = Video::from_persisted(
            id,
            video.title,
            video.order,
            video.is_published,
            video.duration_secs,
            None,
            video.created_at,
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
        state.videos.insert(id, built);
        Ok(id)
    }

    async fn update_video(&self, video: &Video) -> Result<(), StorageError> {
        let mut state = guard(&self.catalog)?;
        let Some(quiz_id) = state.videos.get(&video.id()).map(Video::quiz_id) else {
            return Err(StorageError::NotFound);
        };
        if state.order_taken(video.order(), Some(video.id())) {
            return Err(StorageError::Conflict);
        }
        let mut updated = video.clone();
        updated.set_quiz(quiz_id);
        state.videos.insert(video.id(), updated);
        Ok(())
    }

    async fn get_video(&self, id: VideoId) -> Result<Option<Video>, StorageError> {
        Ok(guard(&self.catalog)?.videos.get(&id).cloned())
    }

    async fn list_videos(&self) -> Result<Vec<Video>, StorageError> {
        let mut videos: Vec<Video> = guard(&self.catalog)?.videos.values().cloned().collect();
        videos.sort_by_key(Video::order);
        Ok(videos)
    }

    async fn list_published_videos_ordered(&self) -> Result<Vec<Video>, StorageError> {
        let mut videos = self.list_videos().await?;
        videos.retain(Video::is_published);
        Ok(videos)
    }

    async fn delete_video(&self, id: VideoId) -> Result<bool, StorageError> {
        let mut state = guard(&self.catalog)?;
        let Some(video) = state.videos.remove(&id) else {
            return Ok(false);
        };
        state.quizzes.retain(|_, q| q.video_id != video.id());
        Ok(true)
    }
}

#[async_trait]
impl QuizRepository for InMemoryRepository {
    async fn insert_new_quiz(&self, quiz: &ValidatedQuiz) -> Result<QuizId, StorageError> {
        let mut state = guard(&self.catalog)?;
        if !state.videos.contains_key(&quiz.video_id) {
            return Err(StorageError::NotFound);
        }
        if state.quizzes.values().any(|q| q.video_id == quiz.video_id) {
            return Err(StorageError::Conflict);
        }
        state.next_quiz += 1;
        let id = QuizId::new(state.next_quiz);
        state.quizzes.insert(id, quiz.clone().assign_id(id));
        if let Some(video) = state.videos.get_mut(&quiz.video_id) {
            video.set_quiz(Some(id));
        }
        Ok(id)
    }

    async fn update_quiz(&self, quiz: &Quiz) -> Result<(), StorageError> {
        let mut state = guard(&self.catalog)?;
        let previous_video = state
            .quizzes
            .get(&quiz.id)
            .map(|q| q.video_id)
            .ok_or(StorageError::NotFound)?;
        if !state.videos.contains_key(&quiz.video_id) {
            return Err(StorageError::NotFound);
        }
        if state
            .quizzes
            .values()
            .any(|q| q.video_id == quiz.video_id && q.id != quiz.id)
        {
            return Err(StorageError::Conflict);
        }

        if previous_video != quiz.video_id {
            if let Some(old) = state.videos.get_mut(&previous_video) {
                old.set_quiz(None);
            }
        }
        if let Some(video) = state.videos.get_mut(&quiz.video_id) {
            video.set_quiz(Some(quiz.id));
        }
        state.quizzes.insert(quiz.id, quiz.clone());
        Ok(())
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Option<Quiz>, StorageError> {
        Ok(guard(&self.catalog)?.quizzes.get(&id).cloned())
    }

    async fn get_quiz_for_video(&self, video_id: VideoId) -> Result<Option<Quiz>, StorageError> {
        Ok(guard(&self.catalog)?
            .quizzes
            .values()
            .find(|q| q.video_id == video_id)
            .cloned())
    }

    async fn delete_quiz(&self, id: QuizId) -> Result<bool, StorageError> {
        let mut state = guard(&self.catalog)?;
        let Some(quiz) = state.quizzes.remove(&id) else {
            return Ok(false);
        };
        if let Some(video) = state.videos.get_mut(&quiz.video_id) {
            if video.quiz_id() == Some(id) {
                video.set_quiz(None);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(&self, user_id: UserId) -> Result<Option<UserProgress>, StorageError> {
        Ok(guard(&self.progress)?.get(&user_id).cloned())
    }

    async fn save_progress(&self, progress: &UserProgress) -> Result<u64, StorageError> {
        let mut records = guard(&self.progress)?;
        let stored = records.get(&progress.user_id()).map(UserProgress::version);
        let expected = progress.version();
        match stored {
            None if expected == 0 => {}
            Some(current) if current == expected => {}
            _ => return Err(StorageError::Conflict),
        }
        let next = expected + 1;
        records.insert(progress.user_id(), progress.clone().with_version(next));
        Ok(next)
    }

    async fn delete_progress(&self, user_id: UserId) -> Result<bool, StorageError> {
        Ok(guard(&self.progress)?.remove(&user_id).is_some())
    }

    async fn list_progress(&self) -> Result<Vec<UserProgress>, StorageError> {
        Ok(guard(&self.progress)?.values().cloned().collect())
    }

    async fn forget_video_everywhere(
        &self,
        video_id: VideoId,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let mut records = guard(&self.progress)?;
        let mut changed = 0;
        for record in records.values_mut() {
            if record.forget_video(video_id) {
                record.touch(now);
                let next = record.version() + 1;
                *record = record.clone().with_version(next);
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl UserRepository for InMemoryRepository {
    async fn insert_user(&self, user: &User) -> Result<(), StorageError> {
        let mut users = guard(&self.users)?;
        if users.contains_key(&user.id()) || users.values().any(|u| u.email() == user.email()) {
            return Err(StorageError::Conflict);
        }
        users.insert(user.id(), user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError> {
        Ok(guard(&self.users)?.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let email = email.trim().to_lowercase();
        Ok(guard(&self.users)?
            .values()
            .find(|u| u.email() == email)
            .cloned())
    }

    async fn delete_user(&self, id: UserId) -> Result<bool, StorageError> {
        let removed = guard(&self.users)?.remove(&id).is_some();
        if removed {
            guard(&self.progress)?.remove(&id);
        }
        Ok(removed)
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>, StorageError> {
        Ok(guard(&self.users)?.keys().copied().collect())
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub videos: Arc<dyn VideoRepository>,
    pub quizzes: Arc<dyn QuizRepository>,
    pub progress: Arc<dyn ProgressRepository>,
    pub users: Arc<dyn UserRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        Self {
            videos: Arc::new(repo.clone()),
            quizzes: Arc::new(repo.clone()),
            progress: Arc::new(repo.clone()),
            users: Arc::new(repo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::model::{
        AnswerOption, OptionId, Question, QuestionId, QuestionKind, QuizDraft, Role,
    };
    use course_core::time::fixed_now;

    fn new_video(order: u32) -> NewVideoRecord {
        NewVideoRecord {
            title: format!("Video {order}"),
            order,
            duration_secs: 120,
            is_published: true,
            created_at: fixed_now(),
        }
    }

    fn quiz_for(video_id: VideoId) -> ValidatedQuiz {
        QuizDraft {
            video_id,
            title: "Check".into(),
            questions: vec![Question::new(
                QuestionId::new(1),
                "Pick",
                1,
                QuestionKind::MultipleChoice {
                    options: vec![
                        AnswerOption::new(OptionId::new(1), "yes", true),
                        AnswerOption::new(OptionId::new(2), "no", false),
                    ],
                },
            )],
            passing_score: 80,
            is_active: true,
        }
        .validate(fixed_now())
        .unwrap()
    }

    #[tokio::test]
    async fn duplicate_order_conflicts() {
        let repo = InMemoryRepository::new();
        repo.insert_new_video(new_video(1)).await.unwrap();
        let err = repo.insert_new_video(new_video(1)).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
    }

    #[tokio::test]
    async fn quiz_writes_maintain_reverse_pointer() {
        let repo = InMemoryRepository::new();
        let v1 = repo.insert_new_video(new_video(1)).await.unwrap();
        let v2 = repo.insert_new_video(new_video(2)).await.unwrap();

        let quiz_id = repo.insert_new_quiz(&quiz_for(v1)).await.unwrap();
        assert_eq!(repo.get_video(v1).await.unwrap().unwrap().quiz_id(), Some(quiz_id));
        assert!(matches!(
            repo.insert_new_quiz(&quiz_for(v1)).await.unwrap_err(),
            StorageError::Conflict
        ));

        let mut quiz = repo.get_quiz(quiz_id).await.unwrap().unwrap();
        quiz.video_id = v2;
        repo.update_quiz(&quiz).await.unwrap();
        assert_eq!(repo.get_video(v1).await.unwrap().unwrap().quiz_id(), None);
        assert_eq!(repo.get_video(v2).await.unwrap().unwrap().quiz_id(), Some(quiz_id));

        assert!(repo.delete_quiz(quiz_id).await.unwrap());
        assert_eq!(repo.get_video(v2).await.unwrap().unwrap().quiz_id(), None);
    }

    #[tokio::test]
    async fn save_progress_is_version_checked() {
        let repo = InMemoryRepository::new();
        let fresh = UserProgress::new(UserId::random(), fixed_now());

        let v1 = repo.save_progress(&fresh).await.unwrap();
        assert_eq!(v1, 1);
        // a second insert of the unversioned record loses
        assert!(matches!(
            repo.save_progress(&fresh).await.unwrap_err(),
            StorageError::Conflict
        ));

        let loaded = repo.get_progress(fresh.user_id()).await.unwrap().unwrap();
        assert_eq!(repo.save_progress(&loaded).await.unwrap(), 2);
        assert!(matches!(
            repo.save_progress(&loaded).await.unwrap_err(),
            StorageError::Conflict
        ));
    }

    #[tokio::test]
    async fn deleting_user_cascades_progress() {
        let repo = InMemoryRepository::new();
        let user = User::new(UserId::random(), "a@b.c", None, Role::Learner, fixed_now()).unwrap();
        repo.insert_user(&user).await.unwrap();
        repo.save_progress(&UserProgress::new(user.id(), fixed_now()))
            .await
            .unwrap();

        assert!(repo.delete_user(user.id()).await.unwrap());
        assert!(repo.get_progress(user.id()).await.unwrap().is_none());
    }
}
