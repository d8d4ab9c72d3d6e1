use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{
    Question, QuestionId, QuestionKind, QuizDraft, QuizId, QuizResult, Role, User, UserId,
    UserProgress, VideoId,
};
use course_core::time::fixed_now;
use services::{Clock, EngineConfig, ErrorKind, ProgressionError, ProgressionService};
use storage::repository::{
    InMemoryRepository, NewVideoRecord, ProgressRepository, QuizRepository, StorageError,
    UserRepository, VideoRepository,
};

/// Progress store that lets another writer sneak in before the next
/// `interference` versioned saves.
struct InterferingProgress {
    inner: InMemoryRepository,
    interference: AtomicU32,
}

#[async_trait]
impl ProgressRepository for InterferingProgress {
    async fn get_progress(&self, user_id: UserId) -> Result<Option<UserProgress>, StorageError> {
        self.inner.get_progress(user_id).await
    }

    async fn save_progress(&self, progress: &UserProgress) -> Result<u64, StorageError> {
        if progress.version() > 0
            && self
                .interference
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            let current = self.inner.get_progress(progress.user_id()).await?.unwrap();
            self.inner.save_progress(&current).await?;
        }
        self.inner.save_progress(progress).await
    }

    async fn delete_progress(&self, user_id: UserId) -> Result<bool, StorageError> {
        self.inner.delete_progress(user_id).await
    }

    async fn list_progress(&self) -> Result<Vec<UserProgress>, StorageError> {
        self.inner.list_progress().await
    }

    async fn forget_video_everywhere(
        &self,
        video_id: VideoId,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        self.inner.forget_video_everywhere(video_id, now).await
    }
}

async fn catalog(repo: &InMemoryRepository, count: u32) -> Vec<VideoId> {
    let mut ids = Vec::new();
    for order in 1..=count {
        ids.push(
            repo.insert_new_video(NewVideoRecord {
                title: format!("Lesson {order}"),
                order,
                duration_secs: 60,
                is_published: true,
                created_at: fixed_now(),
            })
            .await
            .unwrap(),
        );
    }
    ids
}

async fn learner(repo: &InMemoryRepository) -> UserId {
    let id = UserId::random();
    let user = User::new(id, format!("{id}@example.com"), None, Role::Learner, fixed_now()).unwrap();
    repo.insert_user(&user).await.unwrap();
    id
}

/// A passing result that points at no stored quiz. Attempts for it are
/// recorded, then discarded as orphans on the next heal, so the tests below
/// only look at state written by the same call.
fn passing(video: VideoId) -> QuizResult {
    QuizResult {
        quiz_id: QuizId::new(video.value()),
        video_id: video,
        results: Vec::new(),
        total_score: 1,
        total_points: 1,
        percentage: 100,
        passed: true,
        passing_score: 80,
        started_at: None,
        submitted_at: fixed_now(),
    }
}

fn engine(repo: &InMemoryRepository, progress: Arc<dyn ProgressRepository>) -> ProgressionService {
    ProgressionService::new(
        Clock::fixed(fixed_now()),
        EngineConfig::default(),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
        progress,
        Arc::new(repo.clone()),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_for_one_user_are_not_lost() {
    let repo = InMemoryRepository::new();
    let videos = catalog(&repo, 8).await;
    let user = learner(&repo).await;
    let engine = Arc::new(engine(&repo, Arc::new(repo.clone())));

    let mut handles = Vec::new();
    for video in videos.clone() {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .complete_video_with_quiz(user, video, &passing(video))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = repo.get_progress(user).await.unwrap().unwrap();
    let completed: HashSet<VideoId> = stored.completed_videos().iter().copied().collect();
    assert_eq!(completed, videos.iter().copied().collect());
    assert_eq!(stored.completed_videos().len(), videos.len());
    assert_eq!(stored.total_videos_watched(), 8);
    assert_eq!(stored.current_position(), 9);
    assert!(stored.completed_at().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_repeats_of_one_video_get_distinct_attempt_numbers() {
    let repo = InMemoryRepository::new();
    let videos = catalog(&repo, 1).await;
    let user = learner(&repo).await;
    let engine = Arc::new(engine(&repo, Arc::new(repo.clone())));
    // the quiz must exist or heals would discard the attempts between calls
    let quiz = QuizDraft {
        video_id: videos[0],
        title: "Check".into(),
        questions: vec![Question::new(
            QuestionId::new(1),
            "Sure?",
            1,
            QuestionKind::TrueFalse {
                correct_answer: true,
            },
        )],
        passing_score: 50,
        is_active: true,
    }
    .validate(fixed_now())
    .unwrap();
    let quiz_id = repo.insert_new_quiz(&quiz).await.unwrap();

    let mut result = passing(videos[0]);
    result.quiz_id = quiz_id;
    let result = Arc::new(result);

    let mut handles = Vec::new();
    for _ in 0..6 {
        let engine = Arc::clone(&engine);
        let result = Arc::clone(&result);
        let video = videos[0];
        handles.push(tokio::spawn(async move {
            engine.complete_video_with_quiz(user, video, &result).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = repo.get_progress(user).await.unwrap().unwrap();
    let mut numbers: Vec<u32> = stored
        .quiz_attempts()
        .iter()
        .map(|a| a.attempt_number)
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=6).collect::<Vec<_>>());
    assert_eq!(stored.completed_videos(), &[videos[0]]);
    assert_eq!(stored.total_quizzes_passed(), 6);
}

#[tokio::test]
async fn lost_write_is_retried_on_a_fresh_read() {
    let repo = InMemoryRepository::new();
    let videos = catalog(&repo, 2).await;
    let user = learner(&repo).await;
    let interfering = Arc::new(InterferingProgress {
        inner: repo.clone(),
        interference: AtomicU32::new(0),
    });
    let engine = engine(&repo, interfering.clone());

    // create the record first so the next write is a versioned update
    let created = engine.get_progress(user).await.unwrap();
    assert_eq!(created.version(), 1);

    interfering.interference.store(1, Ordering::SeqCst);
    let progress = engine
        .complete_video_with_quiz(user, videos[0], &passing(videos[0]))
        .await
        .unwrap();

    // one version for the interloper, one for the retried write
    assert_eq!(progress.version(), 3);
    assert_eq!(progress.completed_videos(), &[videos[0]]);
    assert_eq!(progress.total_videos_watched(), 1);
}

#[tokio::test]
async fn endless_contention_gives_up_with_conflict() {
    let repo = InMemoryRepository::new();
    let videos = catalog(&repo, 1).await;
    let user = learner(&repo).await;
    let interfering = Arc::new(InterferingProgress {
        inner: repo.clone(),
        interference: AtomicU32::new(0),
    });
    let engine = engine(&repo, interfering.clone());
    engine.get_progress(user).await.unwrap();

    interfering.interference.store(u32::MAX, Ordering::SeqCst);
    let err = engine
        .complete_video_with_quiz(user, videos[0], &passing(videos[0]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProgressionError::WriteContention { attempts: 3, .. }
    ));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let stored = repo.get_progress(user).await.unwrap().unwrap();
    assert!(stored.completed_videos().is_empty());
}
