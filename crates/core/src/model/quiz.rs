use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{OptionId, QuestionId, QuizId, VideoId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizError {
    #[error("quiz title cannot be empty")]
    EmptyTitle,

    #[error("passing score must be between 1 and 100, got {0}")]
    InvalidPassingScore(u8),

    #[error("quiz must contain at least one question")]
    NoQuestions,

    #[error("duplicate question id {0}")]
    DuplicateQuestion(QuestionId),

    #[error("question {0} must be worth at least one point")]
    ZeroPoints(QuestionId),

    #[error("question {0} needs at least two options")]
    TooFewOptions(QuestionId),

    #[error("question {0} has duplicate option ids")]
    DuplicateOption(QuestionId),

    #[error("question {0} has no correct option")]
    NoCorrectOption(QuestionId),

    #[error("question {0} has an empty correct answer")]
    EmptyCorrectAnswer(QuestionId),

    #[error("question {question} has unsupported type `{kind}`")]
    UnsupportedQuestionType { question: QuestionId, kind: String },
}

//
// ─── PASSING SCORE ─────────────────────────────────────────────────────────────
//

/// Minimum percentage (1-100) a submission needs to pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PassingScore(u8);

impl PassingScore {
    /// # Errors
    ///
    /// Returns `QuizError::InvalidPassingScore` outside `1..=100`.
    pub fn new(value: u8) -> Result<Self, QuizError> {
        if (1..=100).contains(&value) {
            Ok(Self(value))
        } else {
            Err(QuizError::InvalidPassingScore(value))
        }
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for PassingScore {
    type Error = QuizError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PassingScore> for u8 {
    fn from(score: PassingScore) -> Self {
        score.0
    }
}

//
// ─── QUESTIONS ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOption {
    pub id: OptionId,
    pub text: String,
    pub is_correct: bool,
}

impl AnswerOption {
    #[must_use]
    pub fn new(id: OptionId, text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            id,
            text: text.into(),
            is_correct,
        }
    }
}

/// Per-kind payload of a question; each case carries only what its scoring rule needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum QuestionKind {
    MultipleChoice {
        options: Vec<AnswerOption>,
    },
    TrueFalse {
        #[serde(rename = "correctAnswer")]
        correct_answer: bool,
    },
    TextInput {
        #[serde(rename = "correctAnswer")]
        correct_answer: String,
    },
    /// A kind this build does not know how to score. Only produced when
    /// rehydrating definitions written by something else.
    Unsupported {
        kind: String,
    },
}

impl QuestionKind {
    /// Storage/wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            QuestionKind::MultipleChoice { .. } => "multiple-choice",
            QuestionKind::TrueFalse { .. } => "true-false",
            QuestionKind::TextInput { .. } => "text-input",
            QuestionKind::Unsupported { kind } => kind.as_str(),
        }
    }

    /// Ids of the options flagged correct. Empty for non-choice kinds.
    #[must_use]
    pub fn correct_option_ids(&self) -> HashSet<OptionId> {
        match self {
            QuestionKind::MultipleChoice { options } => options
                .iter()
                .filter(|o| o.is_correct)
                .map(|o| o.id)
                .collect(),
            _ => HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: QuestionId,
    pub prompt: String,
    pub points: u32,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

impl Question {
    #[must_use]
    pub fn new(id: QuestionId, prompt: impl Into<String>, points: u32, kind: QuestionKind) -> Self {
        Self {
            id,
            prompt: prompt.into(),
            points,
            kind,
        }
    }

    fn validate(&self) -> Result<(), QuizError> {
        if self.points == 0 {
            return Err(QuizError::ZeroPoints(self.id));
        }
        match &self.kind {
            QuestionKind::MultipleChoice { options } => {
                if options.len() < 2 {
                    return Err(QuizError::TooFewOptions(self.id));
                }
                let unique: HashSet<OptionId> = options.iter().map(|o| o.id).collect();
                if unique.len() != options.len() {
                    return Err(QuizError::DuplicateOption(self.id));
                }
                if !options.iter().any(|o| o.is_correct) {
                    return Err(QuizError::NoCorrectOption(self.id));
                }
            }
            QuestionKind::TrueFalse { .. } => {}
            QuestionKind::TextInput { correct_answer } => {
                if correct_answer.trim().is_empty() {
                    return Err(QuizError::EmptyCorrectAnswer(self.id));
                }
            }
            QuestionKind::Unsupported { kind } => {
                return Err(QuizError::UnsupportedQuestionType {
                    question: self.id,
                    kind: kind.clone(),
                });
            }
        }
        Ok(())
    }
}

//
// ─── QUIZ DRAFT ────────────────────────────────────────────────────────────────
//

/// Unvalidated quiz definition as submitted by catalog maintenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizDraft {
    pub video_id: VideoId,
    pub title: String,
    pub questions: Vec<Question>,
    pub passing_score: u8,
    pub is_active: bool,
}

impl QuizDraft {
    /// # Errors
    ///
    /// Returns the first `QuizError` found in the title, passing score or questions.
    pub fn validate(self, now: DateTime<Utc>) -> Result<ValidatedQuiz, QuizError> {
        if self.title.trim().is_empty() {
            return Err(QuizError::EmptyTitle);
        }
        let passing_score = PassingScore::new(self.passing_score)?;
        if self.questions.is_empty() {
            return Err(QuizError::NoQuestions);
        }

        let mut seen = HashSet::with_capacity(self.questions.len());
        for question in &self.questions {
            if !seen.insert(question.id) {
                return Err(QuizError::DuplicateQuestion(question.id));
            }
            question.validate()?;
        }

        Ok(ValidatedQuiz {
            video_id: self.video_id,
            title: self.title.trim().to_owned(),
            questions: self.questions,
            passing_score,
            is_active: self.is_active,
            created_at: now,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuiz {
    pub video_id: VideoId,
    pub title: String,
    pub questions: Vec<Question>,
    pub passing_score: PassingScore,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ValidatedQuiz {
    #[must_use]
    pub fn assign_id(self, id: QuizId) -> Quiz {
        Quiz {
            id,
            video_id: self.video_id,
            title: self.title,
            questions: self.questions,
            passing_score: self.passing_score,
            is_active: self.is_active,
            created_at: self.created_at,
        }
    }
}

//
// ─── QUIZ ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: QuizId,
    pub video_id: VideoId,
    pub title: String,
    pub questions: Vec<Question>,
    pub passing_score: PassingScore,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Quiz {
    /// Sum of points over every question, answered or not.
    #[must_use]
    pub fn total_points(&self) -> u32 {
        self.questions
            .iter()
            .fold(0_u32, |acc, q| acc.saturating_add(q.points))
    }
}

//
// ─── ANSWERS ───────────────────────────────────────────────────────────────────
//

/// A submitted value for one question. The shape decides how it is compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Flag(bool),
    Choice(OptionId),
    Choices(Vec<OptionId>),
    Text(String),
}

impl AnswerValue {
    /// Scalar option id, accepting numeric strings.
    #[must_use]
    pub fn as_option_id(&self) -> Option<OptionId> {
        match self {
            AnswerValue::Choice(id) => Some(*id),
            AnswerValue::Text(raw) => raw.parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            AnswerValue::Flag(v) => Some(*v),
            AnswerValue::Text(raw) => match raw.trim().to_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            AnswerValue::Text(raw) => Some(raw.clone()),
            AnswerValue::Choice(id) => Some(id.to_string()),
            AnswerValue::Flag(v) => Some(v.to_string()),
            AnswerValue::Choices(_) => None,
        }
    }
}

/// Answers keyed by question id. Questions without an entry count as skipped.
pub type Answers = HashMap<QuestionId, AnswerValue>;

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
