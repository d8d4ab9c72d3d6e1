use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::attempt::{QuizAttempt, QuizResult};
use crate::model::ids::{QuizId, UserId, VideoId};

/// Completion percentage at which a watch record is flagged as completed.
pub const DEFAULT_WATCH_COMPLETION_THRESHOLD: u8 = 90;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("quiz {quiz_id} was not passed ({percentage}% < {passing_score}%)")]
    QuizNotPassed {
        quiz_id: QuizId,
        percentage: u32,
        passing_score: u8,
    },

    #[error("quiz result belongs to video {result_video}, not {video}")]
    VideoMismatch {
        video: VideoId,
        result_video: VideoId,
    },

    #[error("watch offsets must be finite and non-negative (start {start}, end {end})")]
    InvalidOffsets { start: f64, end: f64 },
}

//
// ─── WATCH RECORD ──────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchSession {
    pub start_offset: f64,
    pub end_offset: f64,
    pub duration: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Viewing telemetry for one video. Purely descriptive; never grants access.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRecord {
    pub total_watch_time: f64,
    pub sessions: Vec<WatchSession>,
    pub completion_percentage: u8,
    pub is_completed: bool,
    pub last_watched_position: f64,
    pub last_watched_at: Option<DateTime<Utc>>,
}

impl WatchRecord {
    fn append(
        &mut self,
        start_offset: f64,
        end_offset: f64,
        video_duration: f64,
        threshold: u8,
        now: DateTime<Utc>,
    ) -> f64 {
        let duration = (end_offset - start_offset).max(0.0);
        self.sessions.push(WatchSession {
            start_offset,
            end_offset,
            duration,
            recorded_at: now,
        });
        self.total_watch_time += duration;
        self.last_watched_position = self.last_watched_position.max(end_offset);
        self.last_watched_at = Some(now);

        if video_duration > 0.0 {
            let pct = (self.last_watched_position / video_duration * 100.0)
                .round()
                .clamp(0.0, 100.0);
            // Clamped to 0..=100 above.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                self.completion_percentage = pct as u8;
            }
        }
        self.is_completed = self.completion_percentage >= threshold;
        duration
    }
}

//
// ─── CLEANUP / COMPLETION REPORTS ──────────────────────────────────────────────
//

/// What the self-healing pass removed from a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub stale_videos: Vec<VideoId>,
    pub duplicate_videos: usize,
    pub orphan_attempts: usize,
}

impl CleanupReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.stale_videos.is_empty() && self.duplicate_videos == 0 && self.orphan_attempts == 0
    }
}

/// How a recomputation changed the course-completion flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseCompletionChange {
    Unchanged,
    Completed,
    /// Was complete, but the published catalog grew past what the user finished.
    Reopened,
}

//
// ─── USER PROGRESS ─────────────────────────────────────────────────────────────
//

/// One learner's progress document.
///
/// The counters are a cache over `completed_videos` / `quiz_attempts` /
/// watch records and are kept in step by every mutator below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    user_id: UserId,
    completed_videos: Vec<VideoId>,
    current_position: u32,
    video_watch_times: BTreeMap<VideoId, WatchRecord>,
    quiz_attempts: Vec<QuizAttempt>,
    total_videos_watched: u32,
    total_quizzes_passed: u32,
    total_time_spent: f64,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Storage version for conditional writes. Not part of the document.
    #[serde(skip)]
    version: u64,
}

impl UserProgress {
    /// Fresh record: position 1, nothing completed.
    #[must_use]
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            completed_videos: Vec::new(),
            current_position: 1,
            video_watch_times: BTreeMap::new(),
            quiz_attempts: Vec::new(),
            total_videos_watched: 0,
            total_quizzes_passed: 0,
            total_time_spent: 0.0,
            completed_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Attach the storage version the record was read at.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn completed_videos(&self) -> &[VideoId] {
        &self.completed_videos
    }

    #[must_use]
    pub fn has_completed(&self, video_id: VideoId) -> bool {
        self.completed_videos.contains(&video_id)
    }

    #[must_use]
    pub fn current_position(&self) -> u32 {
        self.current_position
    }

    #[must_use]
    pub fn video_watch_times(&self) -> &BTreeMap<VideoId, WatchRecord> {
        &self.video_watch_times
    }

    #[must_use]
    pub fn watch_record(&self, video_id: VideoId) -> Option<&WatchRecord> {
        self.video_watch_times.get(&video_id)
    }

    #[must_use]
    pub fn quiz_attempts(&self) -> &[QuizAttempt] {
        &self.quiz_attempts
    }

    #[must_use]
    pub fn total_videos_watched(&self) -> u32 {
        self.total_videos_watched
    }

    #[must_use]
    pub fn total_quizzes_passed(&self) -> u32 {
        self.total_quizzes_passed
    }

    #[must_use]
    pub fn total_time_spent(&self) -> f64 {
        self.total_time_spent
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn is_course_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Self-healing pass: drops completed ids whose video is gone, collapses
    /// duplicates (first occurrence wins) and discards attempts whose quiz id
    /// is missing or unknown. Counters are recounted afterwards.
    pub fn clean_stale_references(
        &mut self,
        video_exists: impl Fn(VideoId) -> bool,
        quiz_exists: impl Fn(QuizId) -> bool,
    ) -> CleanupReport {
        let mut report = CleanupReport::default();

        let mut seen = HashSet::with_capacity(self.completed_videos.len());
        let mut kept = Vec::with_capacity(self.completed_videos.len());
        for id in self.completed_videos.drain(..) {
            if !video_exists(id) {
                report.stale_videos.push(id);
            } else if seen.insert(id) {
                kept.push(id);
            } else {
                report.duplicate_videos += 1;
            }
        }
        self.completed_videos = kept;

        let before = self.quiz_attempts.len();
        self.quiz_attempts
            .retain(|a| a.quiz_id.is_some_and(|id| quiz_exists(id)));
        report.orphan_attempts = before - self.quiz_attempts.len();

        self.recount();
        report
    }

    /// Drop one video from the completed set (catalog removal cascade).
    pub fn forget_video(&mut self, video_id: VideoId) -> bool {
        let before = self.completed_videos.len();
        self.completed_videos.retain(|id| *id != video_id);
        let removed = before != self.completed_videos.len();
        if removed {
            self.recount();
        }
        removed
    }

    /// Attempt number the next attempt for `quiz_id` would get.
    #[must_use]
    pub fn next_attempt_number(&self, quiz_id: QuizId) -> u32 {
        let prior = self
            .quiz_attempts
            .iter()
            .filter(|a| a.quiz_id == Some(quiz_id))
            .count();
        u32::try_from(prior).unwrap_or(u32::MAX).saturating_add(1)
    }

    /// Append a passing attempt.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::QuizNotPassed` if the result did not pass; the
    /// record is left untouched.
    pub fn record_quiz_attempt(&mut self, result: &QuizResult) -> Result<u32, ProgressError> {
        if !result.passed {
            return Err(ProgressError::QuizNotPassed {
                quiz_id: result.quiz_id,
                percentage: result.percentage,
                passing_score: result.passing_score,
            });
        }

        let attempt_number = self.next_attempt_number(result.quiz_id);
        let attempt = QuizAttempt::from_result(result, attempt_number);
        #[allow(clippy::cast_precision_loss)]
        {
            self.total_time_spent += attempt.time_taken_secs as f64;
        }
        self.quiz_attempts.push(attempt);
        self.total_quizzes_passed = self.total_quizzes_passed.saturating_add(1);
        Ok(attempt_number)
    }

    /// Add a video to the completed set. Returns `false` if it was already there.
    pub fn mark_video_completed(&mut self, video_id: VideoId) -> bool {
        if self.has_completed(video_id) {
            return false;
        }
        self.completed_videos.push(video_id);
        self.total_videos_watched = len_u32(self.completed_videos.len());
        true
    }

    /// Move the position past `order`. Never moves backwards.
    pub fn advance_position(&mut self, order: u32) -> bool {
        let target = order.saturating_add(1);
        if target > self.current_position {
            self.current_position = target;
            true
        } else {
            false
        }
    }

    /// Set or clear `completed_at` from the ids of every currently published video.
    ///
    /// Complete means every published id is in the completed set; an empty
    /// catalog never counts as complete. An existing timestamp is kept while
    /// the condition holds.
    pub fn recompute_course_completion(
        &mut self,
        published: &[VideoId],
        now: DateTime<Utc>,
    ) -> CourseCompletionChange {
        let done: HashSet<VideoId> = self.completed_videos.iter().copied().collect();
        let complete = !published.is_empty() && published.iter().all(|id| done.contains(id));

        match (complete, self.completed_at.is_some()) {
            (true, false) => {
                self.completed_at = Some(now);
                CourseCompletionChange::Completed
            }
            (false, true) => {
                self.completed_at = None;
                CourseCompletionChange::Reopened
            }
            _ => CourseCompletionChange::Unchanged,
        }
    }

    /// Append a viewing interval to the video's watch record.
    ///
    /// Sessions are never merged; overlapping intervals simply accumulate.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidOffsets` for negative or non-finite offsets.
    pub fn record_watch_session(
        &mut self,
        video_id: VideoId,
        start_offset: f64,
        end_offset: f64,
        video_duration: f64,
        threshold: u8,
        now: DateTime<Utc>,
    ) -> Result<&WatchRecord, ProgressError> {
        let valid = |v: f64| v.is_finite() && v >= 0.0;
        if !valid(start_offset) || !valid(end_offset) {
            return Err(ProgressError::InvalidOffsets {
                start: start_offset,
                end: end_offset,
            });
        }

        let record = self.video_watch_times.entry(video_id).or_default();
        let duration = record.append(start_offset, end_offset, video_duration, threshold, now);
        self.total_time_spent += duration;
        self.updated_at = now;
        Ok(record)
    }

    /// Zero every field, keeping identity and creation time.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        let version = self.version;
        let created_at = self.created_at;
        *self = Self::new(self.user_id, now);
        self.created_at = created_at;
        self.version = version;
    }

    fn recount(&mut self) {
        self.total_videos_watched = len_u32(self.completed_videos.len());
        self.total_quizzes_passed =
            len_u32(self.quiz_attempts.iter().filter(|a| a.passed).count());
    }
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn passing(quiz: u64, video: u64) -> QuizResult {
        QuizResult {
            quiz_id: QuizId::new(quiz),
            video_id: VideoId::new(video),
            results: Vec::new(),
            total_score: 1,
            total_points: 1,
            percentage: 100,
            passed: true,
            passing_score: 70,
            started_at: None,
            submitted_at: fixed_now(),
        }
    }

    #[test]
    fn new_record_starts_at_position_one() {
        let p = UserProgress::new(UserId::random(), fixed_now());
        assert_eq!(p.current_position(), 1);
        assert!(p.completed_videos().is_empty());
        assert!(!p.is_course_completed());
    }

    #[test]
    fn mark_completed_is_idempotent() {
        let mut p = UserProgress::new(UserId::random(), fixed_now());
        assert!(p.mark_video_completed(VideoId::new(1)));
        assert!(!p.mark_video_completed(VideoId::new(1)));
        assert_eq!(p.completed_videos().len(), 1);
        assert_eq!(p.total_videos_watched(), 1);
    }

    #[test]
    fn attempt_numbers_are_per_quiz() {
        let mut p = UserProgress::new(UserId::random(), fixed_now());
        assert_eq!(p.record_quiz_attempt(&passing(1, 1)).unwrap(), 1);
        assert_eq!(p.record_quiz_attempt(&passing(1, 1)).unwrap(), 2);
        assert_eq!(p.record_quiz_attempt(&passing(2, 2)).unwrap(), 1);
        assert_eq!(p.total_quizzes_passed(), 3);
    }

    #[test]
    fn failed_result_leaves_record_untouched() {
        let mut p = UserProgress::new(UserId::random(), fixed_now());
        let mut failed = passing(1, 1);
        failed.passed = false;
        failed.percentage = 50;
        let before = p.clone();
        let err = p.record_quiz_attempt(&failed).unwrap_err();
        assert!(matches!(err, ProgressError::QuizNotPassed { percentage: 50, .. }));
        assert_eq!(p, before);
    }

    #[test]
    fn cleanup_drops_stale_duplicates_and_orphans() {
        let mut p = UserProgress::new(UserId::random(), fixed_now());
        p.completed_videos = vec![
            VideoId::new(1),
            VideoId::new(2),
            VideoId::new(1),
            VideoId::new(3),
        ];
        p.record_quiz_attempt(&passing(10, 1)).unwrap();
        p.record_quiz_attempt(&passing(20, 2)).unwrap();
        p.quiz_attempts[0].quiz_id = None;

        let report = p.clean_stale_references(|v| v != VideoId::new(2), |q| q == QuizId::new(10));

        assert_eq!(p.completed_videos(), &[VideoId::new(1), VideoId::new(3)]);
        assert_eq!(report.stale_videos, vec![VideoId::new(2)]);
        assert_eq!(report.duplicate_videos, 1);
        // the None attempt and the one pointing at quiz 20 are both gone
        assert_eq!(report.orphan_attempts, 2);
        assert_eq!(p.total_videos_watched(), 2);
        assert_eq!(p.total_quizzes_passed(), 0);
    }

    #[test]
    fn position_never_decreases() {
        let mut p = UserProgress::new(UserId::random(), fixed_now());
        assert!(p.advance_position(3));
        assert_eq!(p.current_position(), 4);
        assert!(!p.advance_position(1));
        assert_eq!(p.current_position(), 4);
    }

    #[test]
    fn course_completion_requires_every_published_video() {
        let now = fixed_now();
        let mut p = UserProgress::new(UserId::random(), now);
        let published = [VideoId::new(1), VideoId::new(2)];

        p.mark_video_completed(VideoId::new(1));
        assert_eq!(
            p.recompute_course_completion(&published, now),
            CourseCompletionChange::Unchanged
        );
        p.mark_video_completed(VideoId::new(2));
        assert_eq!(
            p.recompute_course_completion(&published, now),
            CourseCompletionChange::Completed
        );

        let grown = [VideoId::new(1), VideoId::new(2), VideoId::new(3)];
        assert_eq!(
            p.recompute_course_completion(&grown, now),
            CourseCompletionChange::Reopened
        );
        assert_eq!(p.completed_at(), None);
    }

    #[test]
    fn empty_catalog_is_never_complete() {
        let mut p = UserProgress::new(UserId::random(), fixed_now());
        assert_eq!(
            p.recompute_course_completion(&[], fixed_now()),
            CourseCompletionChange::Unchanged
        );
        assert!(!p.is_course_completed());
    }

    #[test]
    fn watch_sessions_accumulate_and_derive_percentage() {
        let now = fixed_now();
        let mut p = UserProgress::new(UserId::random(), now);
        let video = VideoId::new(1);

        p.record_watch_session(video, 0.0, 50.0, 100.0, 90, now).unwrap();
        let rec = p.record_watch_session(video, 40.0, 91.0, 100.0, 90, now).unwrap();
        assert_eq!(rec.sessions.len(), 2);
        assert!((rec.total_watch_time - 101.0).abs() < f64::EPSILON);
        assert!((rec.last_watched_position - 91.0).abs() < f64::EPSILON);
        assert_eq!(rec.completion_percentage, 91);
        assert!(rec.is_completed);

        // rewinding keeps the furthest position and never goes negative
        let rec = p.record_watch_session(video, 30.0, 10.0, 100.0, 90, now).unwrap();
        assert!((rec.total_watch_time - 101.0).abs() < f64::EPSILON);
        assert_eq!(rec.completion_percentage, 91);
        assert!((p.total_time_spent() - 101.0).abs() < f64::EPSILON);
    }

    #[test]
    fn watch_percentage_caps_at_100_and_ignores_zero_duration() {
        let now = fixed_now();
        let mut p = UserProgress::new(UserId::random(), now);
        let rec = p.record_watch_session(VideoId::new(1), 0.0, 250.0, 200.0, 90, now).unwrap();
        assert_eq!(rec.completion_percentage, 100);

        let rec = p.record_watch_session(VideoId::new(2), 0.0, 30.0, 0.0, 90, now).unwrap();
        assert_eq!(rec.completion_percentage, 0);
        assert!(!rec.is_completed);
    }

    #[test]
    fn negative_offsets_are_rejected() {
        let mut p = UserProgress::new(UserId::random(), fixed_now());
        let err = p
            .record_watch_session(VideoId::new(1), -1.0, 5.0, 10.0, 90, fixed_now())
            .unwrap_err();
        assert!(matches!(err, ProgressError::InvalidOffsets { .. }));
    }

    #[test]
    fn reset_keeps_identity_and_creation_time() {
        let created = fixed_now();
        let mut p = UserProgress::new(UserId::random(), created).with_version(4);
        p.mark_video_completed(VideoId::new(1));
        p.advance_position(1);
        let later = created + chrono::Duration::days(1);
        p.reset(later);

        assert_eq!(p.current_position(), 1);
        assert!(p.completed_videos().is_empty());
        assert_eq!(p.created_at(), created);
        assert_eq!(p.updated_at(), later);
        assert_eq!(p.version(), 4);
    }

    #[test]
    fn document_json_uses_camel_case_and_skips_version() {
        let p = UserProgress::new(UserId::random(), fixed_now()).with_version(7);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["currentPosition"], 1);
        assert!(json.get("version").is_none());
        let back: UserProgress = serde_json::from_value(json).unwrap();
        assert_eq!(back.version(), 0);
    }
}
