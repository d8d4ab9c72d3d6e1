//! Read-only aggregation over progress records.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{UserId, UserProgress, VideoId};
use crate::scoring::percentage;

/// Per-user statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStats {
    pub total_videos: u32,
    pub completed_videos: u32,
    pub completion_percentage: u32,
    pub current_position: u32,
    pub total_time_spent: f64,
    pub avg_time_per_video: f64,
    pub total_quiz_attempts: u32,
    pub passed_quizzes: u32,
    pub quiz_success_rate: u32,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Platform-wide statistics over records whose owner still exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub total_learners: u32,
    pub total_videos: u32,
    pub courses_completed: u32,
    pub average_completion_percentage: f64,
    pub average_time_spent: f64,
    pub total_quiz_attempts: u32,
    pub total_quizzes_passed: u32,
    pub quiz_success_rate: u32,
    /// Records skipped because their user no longer exists.
    pub orphaned_records: u32,
}

/// Stats for one record against the currently published catalog.
#[must_use]
pub fn user_stats(progress: &UserProgress, published: &[VideoId]) -> ProgressStats {
    let completed = distinct(progress.completed_videos());
    let total_videos = count(published.len());

    let attempts = progress.quiz_attempts();
    let total_quiz_attempts = count(attempts.len());
    let passed_quizzes = count(attempts.iter().filter(|a| a.passed).count());

    let avg_time_per_video = if completed == 0 {
        0.0
    } else {
        progress.total_time_spent() / f64::from(completed)
    };

    ProgressStats {
        total_videos,
        completed_videos: completed,
        completion_percentage: percentage(completed, total_videos).min(100),
        current_position: progress.current_position(),
        total_time_spent: progress.total_time_spent(),
        avg_time_per_video,
        total_quiz_attempts,
        passed_quizzes,
        quiz_success_rate: percentage(passed_quizzes, total_quiz_attempts),
        is_completed: progress.is_course_completed(),
        created_at: progress.created_at(),
        updated_at: progress.updated_at(),
        completed_at: progress.completed_at(),
    }
}

/// Aggregate every record whose user passes `user_exists`.
#[must_use]
pub fn platform_stats(
    records: &[UserProgress],
    published: &[VideoId],
    user_exists: impl Fn(UserId) -> bool,
) -> PlatformStats {
    let mut learners = 0_u32;
    let mut orphaned = 0_u32;
    let mut courses_completed = 0_u32;
    let mut completion_sum = 0.0_f64;
    let mut time_sum = 0.0_f64;
    let mut attempts = 0_u32;
    let mut passed = 0_u32;

    for record in records {
        if !user_exists(record.user_id()) {
            orphaned = orphaned.saturating_add(1);
            continue;
        }
        let stats = user_stats(record, published);
        learners = learners.saturating_add(1);
        if stats.is_completed {
            courses_completed = courses_completed.saturating_add(1);
        }
        completion_sum += f64::from(stats.completion_percentage);
        time_sum += stats.total_time_spent;
        attempts = attempts.saturating_add(stats.total_quiz_attempts);
        passed = passed.saturating_add(stats.passed_quizzes);
    }

    let mean = |sum: f64| {
        if learners == 0 {
            0.0
        } else {
            sum / f64::from(learners)
        }
    };

    PlatformStats {
        total_learners: learners,
        total_videos: count(published.len()),
        courses_completed,
        average_completion_percentage: mean(completion_sum),
        average_time_spent: mean(time_sum),
        total_quiz_attempts: attempts,
        total_quizzes_passed: passed,
        quiz_success_rate: percentage(passed, attempts),
        orphaned_records: orphaned,
    }
}

fn distinct(ids: &[VideoId]) -> u32 {
    count(ids.iter().collect::<HashSet<_>>().len())
}

fn count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QuizId, QuizResult};
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
            passing_score: 50,
            started_at: Some(fixed_now() - chrono::Duration::seconds(60)),
            submitted_at: fixed_now(),
        }
    }

    fn published() -> Vec<VideoId> {
        (1..=4).map(VideoId::new).collect()
    }

    #[test]
    fn user_stats_reflect_record() {
        let mut p = UserProgress::new(UserId::random(), fixed_now());
        p.record_quiz_attempt(&passing(1, 1)).unwrap();
        p.mark_video_completed(VideoId::new(1));
        p.record_quiz_attempt(&passing(2, 2)).unwrap();
        p.mark_video_completed(VideoId::new(2));

        let stats = user_stats(&p, &published());
        assert_eq!(stats.total_videos, 4);
        assert_eq!(stats.completed_videos, 2);
        assert_eq!(stats.completion_percentage, 50);
        assert_eq!(stats.total_quiz_attempts, 2);
        assert_eq!(stats.quiz_success_rate, 100);
        assert!((stats.avg_time_per_video - 60.0).abs() < f64::EPSILON);
        assert!(!stats.is_completed);
    }

    #[test]
    fn completion_percentage_is_capped() {
        let mut p = UserProgress::new(UserId::random(), fixed_now());
        for id in 1..=3 {
            p.mark_video_completed(VideoId::new(id));
        }
        let stats = user_stats(&p, &[VideoId::new(1)]);
        assert_eq!(stats.completion_percentage, 100);
    }

    #[test]
    fn empty_record_has_zero_rates() {
        let p = UserProgress::new(UserId::random(), fixed_now());
        let stats = user_stats(&p, &[]);
        assert_eq!(stats.completion_percentage, 0);
        assert_eq!(stats.quiz_success_rate, 0);
        assert!(stats.avg_time_per_video.abs() < f64::EPSILON);
    }

    #[test]
    fn platform_stats_skip_orphans() {
        let alive = UserId::random();
        let gone = UserId::random();

        let mut a = UserProgress::new(alive, fixed_now());
        a.mark_video_completed(VideoId::new(1));
        let mut b = UserProgress::new(gone, fixed_now());
        for id in 1..=4 {
            b.mark_video_completed(VideoId::new(id));
        }

        let stats = platform_stats(&[a, b], &published(), |u| u == alive);
        assert_eq!(stats.total_learners, 1);
        assert_eq!(stats.orphaned_records, 1);
        assert!((stats.average_completion_percentage - 25.0).abs() < f64::EPSILON);
        assert_eq!(stats.courses_completed, 0);
    }
}
