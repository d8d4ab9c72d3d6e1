use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use course_core::{
    access::{self, AccessDecision},
    model::{
        Answers, QuizId, QuizResult, Role, UserId, UserProgress, Video, VideoId, WatchRecord,
    },
    progression::{self, CompletionOutcome},
    scoring,
    stats::{self, PlatformStats, ProgressStats},
    time::Clock,
};
use storage::repository::{
    ProgressRepository, QuizRepository, Storage, StorageError, UserRepository, VideoRepository,
};

use crate::config::EngineConfig;
use crate::error::ProgressionError;
use crate::locks::UserLocks;

//
// ─── CATALOG SNAPSHOT ──────────────────────────────────────────────────────────
//

/// Catalog state read once per operation. Reads take no locks.
struct CatalogSnapshot {
    videos: Vec<Video>,
    video_ids: HashSet<VideoId>,
    quiz_ids: HashSet<QuizId>,
}

impl CatalogSnapshot {
    fn video(&self, id: VideoId) -> Option<&Video> {
        self.videos.iter().find(|v| v.id() == id)
    }

    fn published_ids(&self) -> Vec<VideoId> {
        self.videos
            .iter()
            .filter(|v| v.is_published())
            .map(Video::id)
            .collect()
    }
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// The engine the request layer talks to: gating, watch telemetry, quiz
/// scoring and the completion transaction.
///
/// Every write to a progress record happens under the user's lock and is
/// persisted with a version-checked write, retried on conflict.
#[derive(Clone)]
pub struct ProgressionService {
    clock: Clock,
    config: EngineConfig,
    locks: UserLocks,
    videos: Arc<dyn VideoRepository>,
    quizzes: Arc<dyn QuizRepository>,
    progress: Arc<dyn ProgressRepository>,
    users: Arc<dyn UserRepository>,
}

impl ProgressionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        config: EngineConfig,
        videos: Arc<dyn VideoRepository>,
        quizzes: Arc<dyn QuizRepository>,
        progress: Arc<dyn ProgressRepository>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            clock,
            config,
            locks: UserLocks::new(),
            videos,
            quizzes,
            progress,
            users,
        }
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock, config: EngineConfig) -> Self {
        Self::new(
            clock,
            config,
            Arc::clone(&storage.videos),
            Arc::clone(&storage.quizzes),
            Arc::clone(&storage.progress),
            Arc::clone(&storage.users),
        )
    }

    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.config
    }

    // ─── access ────────────────────────────────────────────────────────────

    /// Whether `user_id` may currently view `video_id`.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound`/`VideoNotFound` for unknown ids and storage errors.
    pub async fn check_access(
        &self,
        user_id: UserId,
        video_id: VideoId,
    ) -> Result<bool, ProgressionError> {
        Ok(self.access_decision(user_id, video_id).await?.is_granted())
    }

    /// The structured decision behind [`Self::check_access`]. Pure read; never
    /// creates or heals the progress record.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound`/`VideoNotFound` for unknown ids and storage errors.
    pub async fn access_decision(
        &self,
        user_id: UserId,
        video_id: VideoId,
    ) -> Result<AccessDecision, ProgressionError> {
        let role = self.role_of(user_id).await?;
        let video = self
            .videos
            .get_video(video_id)
            .await?
            .ok_or(ProgressionError::VideoNotFound(video_id))?;
        let published = self.videos.list_published_videos_ordered().await?;
        let record = self.progress.get_progress(user_id).await?;
        let completed = record.as_ref().map_or(&[][..], UserProgress::completed_videos);

        let decision = access::evaluate(role, &video, &published, completed);
        debug!(%user_id, %video_id, ?decision, "access evaluated");
        Ok(decision)
    }

    // ─── watch sessions ────────────────────────────────────────────────────

    /// Append a viewing interval to the user's watch record for `video_id`.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` if the video is still locked for the user,
    /// `Progress(InvalidOffsets)` for unusable offsets, not-found and storage errors.
    pub async fn record_watch_session(
        &self,
        user_id: UserId,
        video_id: VideoId,
        start_offset: f64,
        end_offset: f64,
        video_duration: f64,
    ) -> Result<WatchRecord, ProgressionError> {
        let role = self.role_of(user_id).await?;
        let threshold = self.config.watch_completion_threshold;

        let (_, record) = self
            .mutate(user_id, "watch-session", |progress, catalog, now| {
                let video = catalog
                    .video(video_id)
                    .ok_or(ProgressionError::VideoNotFound(video_id))?;
                let decision =
                    access::evaluate(role, video, &catalog.videos, progress.completed_videos());
                if !decision.is_granted() {
                    return Err(ProgressionError::AccessDenied { user_id, video_id });
                }
                let record = progress.record_watch_session(
                    video_id,
                    start_offset,
                    end_offset,
                    video_duration,
                    threshold,
                    now,
                )?;
                Ok(record.clone())
            })
            .await?;

        debug!(
            %user_id,
            %video_id,
            completion = record.completion_percentage,
            "watch session recorded"
        );
        Ok(record)
    }

    // ─── quizzes ───────────────────────────────────────────────────────────

    /// Score a submission. Never touches progress; a passing result is fed to
    /// [`Self::complete_video_with_quiz`] separately.
    ///
    /// # Errors
    ///
    /// Returns `QuizNotFound` for a missing or inactive quiz, `AccessDenied`
    /// when the quiz's video is locked for the user, and
    /// `Scoring(UnsupportedQuestionType)` for an answered question of unknown kind.
    pub async fn evaluate_quiz(
        &self,
        quiz_id: QuizId,
        user_id: UserId,
        answers: &Answers,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<QuizResult, ProgressionError> {
        let quiz = self
            .quizzes
            .get_quiz(quiz_id)
            .await?
            .filter(|q| q.is_active)
            .ok_or(ProgressionError::QuizNotFound(quiz_id))?;

        if !self.check_access(user_id, quiz.video_id).await? {
            return Err(ProgressionError::AccessDenied {
                user_id,
                video_id: quiz.video_id,
            });
        }

        let result = scoring::evaluate_submission(&quiz, answers, started_at, self.clock.now())?;
        info!(
            %user_id,
            %quiz_id,
            percentage = result.percentage,
            passed = result.passed,
            "quiz evaluated"
        );
        Ok(result)
    }

    // ─── completion transaction ────────────────────────────────────────────

    /// Record a passing attempt, mark the video completed, advance the
    /// position and recompute course completion, as one write.
    ///
    /// Stale references found on the way are cleaned and persisted first.
    ///
    /// # Errors
    ///
    /// Returns `Progress(QuizNotPassed)` for a failing result without touching
    /// storage, `Progress(VideoMismatch)` when the result is for another video,
    /// `WriteContention` if the write keeps losing, not-found and storage errors.
    pub async fn complete_video_with_quiz(
        &self,
        user_id: UserId,
        video_id: VideoId,
        result: &QuizResult,
    ) -> Result<UserProgress, ProgressionError> {
        if !result.passed {
            return Err(course_core::model::ProgressError::QuizNotPassed {
                quiz_id: result.quiz_id,
                percentage: result.percentage,
                passing_score: result.passing_score,
            }
            .into());
        }
        self.role_of(user_id).await?;

        let (progress, outcome) = self
            .mutate(user_id, "complete-video", |progress, catalog, now| {
                let video = catalog
                    .video(video_id)
                    .ok_or(ProgressionError::VideoNotFound(video_id))?;
                let published = catalog.published_ids();
                let outcome: CompletionOutcome =
                    progression::complete_video(progress, video, result, &published, now)?;
                Ok(outcome)
            })
            .await?;

        info!(
            %user_id,
            %video_id,
            attempt = outcome.attempt_number,
            newly_completed = outcome.newly_completed,
            position = progress.current_position(),
            course = ?outcome.course,
            "video completed"
        );
        Ok(progress)
    }

    // ─── reads ─────────────────────────────────────────────────────────────

    /// The user's record, created on first read. Stale references are healed
    /// and course completion is recomputed against the current catalog; any
    /// change is persisted before returning.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` for unknown users and storage errors.
    pub async fn get_progress(&self, user_id: UserId) -> Result<UserProgress, ProgressionError> {
        self.role_of(user_id).await?;
        let (progress, ()) = self
            .mutate(user_id, "read", |progress, catalog, now| {
                let published = catalog.published_ids();
                progress.recompute_course_completion(&published, now);
                Ok(())
            })
            .await?;
        Ok(progress)
    }

    /// # Errors
    ///
    /// See [`Self::get_progress`].
    pub async fn get_stats(&self, user_id: UserId) -> Result<ProgressStats, ProgressionError> {
        let progress = self.get_progress(user_id).await?;
        let published: Vec<VideoId> = self
            .videos
            .list_published_videos_ordered()
            .await?
            .iter()
            .map(Video::id)
            .collect();
        Ok(stats::user_stats(&progress, &published))
    }

    /// Aggregate over every record whose user still exists.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn platform_stats(&self) -> Result<PlatformStats, ProgressionError> {
        let records = self.progress.list_progress().await?;
        let users: HashSet<UserId> = self.users.list_user_ids().await?.into_iter().collect();
        let published: Vec<VideoId> = self
            .videos
            .list_published_videos_ordered()
            .await?
            .iter()
            .map(Video::id)
            .collect();

        let platform = stats::platform_stats(&records, &published, |id| users.contains(&id));
        if platform.orphaned_records > 0 {
            warn!(
                orphaned = platform.orphaned_records,
                "progress records without a user were skipped"
            );
        }
        Ok(platform)
    }

    // ─── admin ─────────────────────────────────────────────────────────────

    /// Replace the record with a fresh one, keeping its creation time.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` for unknown users and storage errors.
    pub async fn reset_progress(&self, user_id: UserId) -> Result<UserProgress, ProgressionError> {
        self.role_of(user_id).await?;
        let (progress, ()) = self
            .mutate(user_id, "reset", |progress, _, now| {
                progress.reset(now);
                Ok(())
            })
            .await?;
        info!(%user_id, "progress reset");
        Ok(progress)
    }

    // ─── internals ─────────────────────────────────────────────────────────

    async fn role_of(&self, user_id: UserId) -> Result<Role, ProgressionError> {
        self.users
            .get_user(user_id)
            .await?
            .map(|u| u.role())
            .ok_or(ProgressionError::UserNotFound(user_id))
    }

    async fn catalog_snapshot(&self) -> Result<CatalogSnapshot, StorageError> {
        let videos = self.videos.list_videos().await?;
        let video_ids = videos.iter().map(Video::id).collect();
        // quiz writes keep the reverse pointer in step, so pointers name every quiz
        let quiz_ids = videos.iter().filter_map(Video::quiz_id).collect();
        Ok(CatalogSnapshot {
            videos,
            video_ids,
            quiz_ids,
        })
    }

    /// Read-modify-write of one user's record.
    ///
    /// Holds the user's lock throughout. Each round loads the record (or
    /// starts a fresh one), heals stale references and persists that on its
    /// own, then runs `apply` and persists the result if it changed. A
    /// version conflict restarts the round.
    async fn mutate<T, F>(
        &self,
        user_id: UserId,
        op: &'static str,
        mut apply: F,
    ) -> Result<(UserProgress, T), ProgressionError>
    where
        F: FnMut(&mut UserProgress, &CatalogSnapshot, DateTime<Utc>) -> Result<T, ProgressionError>
            + Send,
        T: Send,
    {
        let _guard = self.locks.lock(user_id).await;
        let attempts = self.config.max_write_attempts;

        for attempt in 1..=attempts {
            let now = self.clock.now();
            let catalog = self.catalog_snapshot().await?;
            let mut progress = match self.progress.get_progress(user_id).await? {
                Some(record) => record,
                None => UserProgress::new(user_id, now),
            };

            let report = progress.clean_stale_references(
                |id| catalog.video_ids.contains(&id),
                |id| catalog.quiz_ids.contains(&id),
            );
            if !report.is_clean() {
                warn!(
                    %user_id,
                    stale = ?report.stale_videos,
                    duplicates = report.duplicate_videos,
                    orphan_attempts = report.orphan_attempts,
                    "healed stale progress references"
                );
                progress.touch(now);
                match self.save(&progress).await {
                    Ok(version) => progress = progress.with_version(version),
                    Err(StorageError::Conflict) => {
                        warn!(%user_id, op, attempt, "progress write conflict, retrying");
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            let before = progress.clone();
            let value = apply(&mut progress, &catalog, now)?;
            if progress == before && progress.version() > 0 {
                return Ok((progress, value));
            }

            match self.save(&progress).await {
                Ok(version) => return Ok((progress.with_version(version), value)),
                Err(StorageError::Conflict) => {
                    warn!(%user_id, op, attempt, "progress write conflict, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ProgressionError::WriteContention { user_id, attempts })
    }

    async fn save(&self, progress: &UserProgress) -> Result<u64, StorageError> {
        self.progress.save_progress(progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::model::{
        AnswerOption, AnswerValue, OptionId, Question, QuestionId, QuestionKind, QuizDraft, User,
    };
    use course_core::time::fixed_now;
    use storage::repository::{InMemoryRepository, NewVideoRecord};

    struct Fixture {
        repo: InMemoryRepository,
        service: ProgressionService,
        learner: UserId,
        videos: Vec<VideoId>,
    }

    async fn fixture(count: u32) -> Fixture {
        let repo = InMemoryRepository::new();
        let now = fixed_now();
        let mut videos = Vec::new();
        for order in 1..=count {
            let id = repo
                .insert_new_video(NewVideoRecord {
                    title: format!("Lesson {order}"),
                    order,
                    duration_secs: 100,
                    is_published: true,
                    created_at: now,
                })
                .await
                .unwrap();
            let quiz = QuizDraft {
                video_id: id,
                title: format!("Quiz {order}"),
                questions: vec![Question::new(
                    QuestionId::new(1),
                    "Pick the first",
                    1,
                    QuestionKind::MultipleChoice {
                        options: vec![
                            AnswerOption::new(OptionId::new(1), "first", true),
                            AnswerOption::new(OptionId::new(2), "second", false),
                        ],
                    },
                )],
                passing_score: 80,
                is_active: true,
            }
            .validate(now)
            .unwrap();
            repo.insert_new_quiz(&quiz).await.unwrap();
            videos.push(id);
        }

        let learner = User::new(UserId::random(), "l@example.com", None, Role::Learner, now)
            .unwrap();
        repo.insert_user(&learner).await.unwrap();

        let service = ProgressionService::new(
            Clock::fixed(now),
            EngineConfig::default(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        );
        Fixture {
            repo,
            service,
            learner: learner.id(),
            videos,
        }
    }

    fn right_answer() -> Answers {
        Answers::from([(QuestionId::new(1), AnswerValue::Choice(OptionId::new(1)))])
    }

    #[tokio::test]
    async fn first_read_creates_the_record() {
        let fx = fixture(2).await;
        assert!(fx.repo.get_progress(fx.learner).await.unwrap().is_none());

        let progress = fx.service.get_progress(fx.learner).await.unwrap();
        assert_eq!(progress.current_position(), 1);
        assert_eq!(progress.version(), 1);

        // nothing changed, so a second read does not write
        let again = fx.service.get_progress(fx.learner).await.unwrap();
        assert_eq!(again.version(), 1);
    }

    #[tokio::test]
    async fn failing_result_never_touches_storage() {
        let fx = fixture(1).await;
        let quiz = fx.repo.get_quiz_for_video(fx.videos[0]).await.unwrap().unwrap();
        let wrong = Answers::from([(QuestionId::new(1), AnswerValue::Choice(OptionId::new(2)))]);
        let result = fx
            .service
            .evaluate_quiz(quiz.id, fx.learner, &wrong, None)
            .await
            .unwrap();
        assert!(!result.passed);

        let err = fx
            .service
            .complete_video_with_quiz(fx.learner, fx.videos[0], &result)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::QuizNotPassed);
        assert!(fx.repo.get_progress(fx.learner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inactive_quiz_is_not_found() {
        let fx = fixture(1).await;
        let mut quiz = fx.repo.get_quiz_for_video(fx.videos[0]).await.unwrap().unwrap();
        quiz.is_active = false;
        fx.repo.update_quiz(&quiz).await.unwrap();

        let err = fx
            .service
            .evaluate_quiz(quiz.id, fx.learner, &right_answer(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::QuizNotFound(_)));
    }

    #[tokio::test]
    async fn quiz_for_locked_video_is_denied() {
        let fx = fixture(2).await;
        let quiz = fx.repo.get_quiz_for_video(fx.videos[1]).await.unwrap().unwrap();
        let err = fx
            .service
            .evaluate_quiz(quiz.id, fx.learner, &right_answer(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AccessDenied);
    }

    #[tokio::test]
    async fn watch_session_on_locked_video_is_denied() {
        let fx = fixture(2).await;
        let err = fx
            .service
            .record_watch_session(fx.learner, fx.videos[1], 0.0, 50.0, 100.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::AccessDenied { .. }));

        let record = fx
            .service
            .record_watch_session(fx.learner, fx.videos[0], 0.0, 95.0, 100.0)
            .await
            .unwrap();
        assert_eq!(record.completion_percentage, 95);
        assert!(record.is_completed);
        // telemetry alone never unlocks the next video
        assert!(!fx.service.check_access(fx.learner, fx.videos[1]).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let fx = fixture(1).await;
        let err = fx.service.get_progress(UserId::random()).await.unwrap_err();
        assert!(matches!(err, ProgressionError::UserNotFound(_)));
    }
}
