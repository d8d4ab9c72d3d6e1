//! Quiz evaluation. Pure: the same quiz and answers always score the same.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    AnswerValue, Answers, OptionId, Question, QuestionId, QuestionKind, QuestionResult, Quiz,
    QuizResult,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScoringError {
    #[error("question {question} has unsupported type `{kind}`")]
    UnsupportedQuestionType { question: QuestionId, kind: String },
}

/// Score breakdown before it is attached to a quiz/time context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub results: Vec<QuestionResult>,
    pub total_score: u32,
    pub total_points: u32,
    pub percentage: u32,
    pub passed: bool,
}

/// Score `answers` against `quiz`.
///
/// Unanswered questions earn nothing and are flagged `skipped`; they still
/// count toward the total.
///
/// # Errors
///
/// Returns `ScoringError::UnsupportedQuestionType` when an answered question
/// has a kind this evaluator cannot score.
pub fn evaluate(quiz: &Quiz, answers: &Answers) -> Result<Evaluation, ScoringError> {
    let total_points = quiz.total_points();
    let mut total_score = 0_u32;
    let mut results = Vec::with_capacity(quiz.questions.len());

    for question in &quiz.questions {
        let Some(answer) = answers.get(&question.id) else {
            results.push(QuestionResult {
                question_id: question.id,
                is_correct: false,
                points_earned: 0,
                points_possible: question.points,
                skipped: true,
            });
            continue;
        };

        let is_correct = is_correct(question, answer)?;
        let points_earned = if is_correct { question.points } else { 0 };
        total_score = total_score.saturating_add(points_earned);
        results.push(QuestionResult {
            question_id: question.id,
            is_correct,
            points_earned,
            points_possible: question.points,
            skipped: false,
        });
    }

    let percentage = percentage(total_score, total_points);
    Ok(Evaluation {
        results,
        total_score,
        total_points,
        percentage,
        passed: percentage >= u32::from(quiz.passing_score.value()),
    })
}

/// Evaluate and wrap the outcome with quiz identity and timestamps.
///
/// # Errors
///
/// See [`evaluate`].
pub fn evaluate_submission(
    quiz: &Quiz,
    answers: &Answers,
    started_at: Option<DateTime<Utc>>,
    submitted_at: DateTime<Utc>,
) -> Result<QuizResult, ScoringError> {
    let evaluation = evaluate(quiz, answers)?;
    Ok(QuizResult {
        quiz_id: quiz.id,
        video_id: quiz.video_id,
        results: evaluation.results,
        total_score: evaluation.total_score,
        total_points: evaluation.total_points,
        percentage: evaluation.percentage,
        passed: evaluation.passed,
        passing_score: quiz.passing_score.value(),
        started_at,
        submitted_at,
    })
}

/// `round(score / total * 100)`, rounding halves up; 0 when there are no points.
#[must_use]
pub fn percentage(score: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let score = u64::from(score);
    let total = u64::from(total);
    let pct = (score * 200 + total) / (total * 2);
    u32::try_from(pct).unwrap_or(u32::MAX)
}

fn is_correct(question: &Question, answer: &AnswerValue) -> Result<bool, ScoringError> {
    match &question.kind {
        QuestionKind::MultipleChoice { .. } => {
            let expected = question.kind.correct_option_ids();
            Ok(match answer {
                AnswerValue::Choices(submitted) => {
                    let submitted: HashSet<OptionId> = submitted.iter().copied().collect();
                    submitted == expected
                }
                scalar => match scalar.as_option_id() {
                    // a single id can only match a question with exactly one correct option
                    Some(id) => expected.len() == 1 && expected.contains(&id),
                    None => false,
                },
            })
        }
        QuestionKind::TrueFalse { correct_answer } => {
            Ok(answer.as_flag() == Some(*correct_answer))
        }
        QuestionKind::TextInput { correct_answer } => Ok(answer
            .as_text()
            .is_some_and(|text| normalize(&text) == normalize(correct_answer))),
        QuestionKind::Unsupported { kind } => Err(ScoringError::UnsupportedQuestionType {
            question: question.id,
            kind: kind.clone(),
        }),
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}
