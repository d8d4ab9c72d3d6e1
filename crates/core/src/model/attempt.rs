use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{QuestionId, QuizId, VideoId};

/// Outcome for a single question of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub question_id: QuestionId,
    pub is_correct: bool,
    pub points_earned: u32,
    pub points_possible: u32,
    /// No answer was submitted for this question.
    pub skipped: bool,
}

/// Scored submission, handed from the evaluator to the completion transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub quiz_id: QuizId,
    pub video_id: VideoId,
    pub results: Vec<QuestionResult>,
    pub total_score: u32,
    pub total_points: u32,
    pub percentage: u32,
    pub passed: bool,
    pub passing_score: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
}

impl QuizResult {
    /// Whole seconds between start and submission; zero when no start was given
    /// or the clock went backwards.
    #[must_use]
    pub fn time_taken_secs(&self) -> u64 {
        self.started_at
            .map(|started| self.submitted_at.signed_duration_since(started).num_seconds())
            .and_then(|secs| u64::try_from(secs).ok())
            .unwrap_or(0)
    }
}

/// Entry of a user's quiz attempt log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    /// `None` only in legacy documents; such attempts are discarded on cleanup.
    #[serde(default)]
    pub quiz_id: Option<QuizId>,
    #[serde(default)]
    pub video_id: Option<VideoId>,
    /// 1-based, per quiz.
    pub attempt_number: u32,
    pub score: u32,
    pub total_points: u32,
    pub percentage: u32,
    pub passed: bool,
    #[serde(default)]
    pub results: Vec<QuestionResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub time_taken_secs: u64,
}

impl QuizAttempt {
    #[must_use]
    pub fn from_result(result: &QuizResult, attempt_number: u32) -> Self {
        Self {
            quiz_id: Some(result.quiz_id),
            video_id: Some(result.video_id),
            attempt_number,
            score: result.total_score,
            total_points: result.total_points,
            percentage: result.percentage,
            passed: result.passed,
            results: result.results.clone(),
            started_at: result.started_at,
            completed_at: result.submitted_at,
            time_taken_secs: result.time_taken_secs(),
        }
    }
}
