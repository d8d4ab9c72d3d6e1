//! Steps of the completion transaction that only touch the progress record.
//!
//! Stale-reference cleanup needs the catalog and runs before this, see
//! [`UserProgress::clean_stale_references`]. Persisting and serializing
//! writers is the caller's job.

use chrono::{DateTime, Utc};

use crate::model::{
    CourseCompletionChange, ProgressError, QuizResult, UserProgress, Video, VideoId,
};

/// What a completion changed on the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionOutcome {
    pub attempt_number: u32,
    /// `false` when the video was already in the completed set.
    pub newly_completed: bool,
    pub position_advanced: bool,
    pub course: CourseCompletionChange,
}

/// Record a passing quiz attempt, mark `video` completed, advance the
/// position and recompute course completion against `published`.
///
/// # Errors
///
/// Returns `ProgressError::QuizNotPassed` for a failing result and
/// `ProgressError::VideoMismatch` when the result belongs to another video.
/// The record is unchanged on error.
pub fn complete_video(
    progress: &mut UserProgress,
    video: &Video,
    result: &QuizResult,
    published: &[VideoId],
    now: DateTime<Utc>,
) -> Result<CompletionOutcome, ProgressError> {
    if !result.passed {
        return Err(ProgressError::QuizNotPassed {
            quiz_id: result.quiz_id,
            percentage: result.percentage,
            passing_score: result.passing_score,
        });
    }
    if result.video_id != video.id() {
        return Err(ProgressError::VideoMismatch {
            video: video.id(),
            result_video: result.video_id,
        });
    }

    let attempt_number = progress.record_quiz_attempt(result)?;
    let newly_completed = progress.mark_video_completed(video.id());
    let position_advanced = progress.advance_position(video.order());
    let course = progress.recompute_course_completion(published, now);
    progress.touch(now);

    Ok(CompletionOutcome {
        attempt_number,
        newly_completed,
        position_advanced,
        course,
    })
}
