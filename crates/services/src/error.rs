//! Shared error types for the services crate.
//!
//! Request layers map failures through [`ErrorKind`]; the `Display` text is
//! diagnostic only.

use thiserror::Error;

use course_core::model::{
    ProgressError, QuizError, QuizId, UserError, UserId, VideoError, VideoId,
};
use course_core::scoring::ScoringError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Coarse classification every service error maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    QuizNotPassed,
    UnsupportedQuestionType,
    Conflict,
    /// Input rejected by validation.
    Invalid,
    Internal,
}

fn storage_kind(err: &StorageError) -> ErrorKind {
    match err {
        StorageError::NotFound => ErrorKind::NotFound,
        StorageError::Conflict => ErrorKind::Conflict,
        _ => ErrorKind::Internal,
    }
}

/// Errors emitted by `ProgressionService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressionError {
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("video {0} not found")]
    VideoNotFound(VideoId),
    #[error("quiz {0} not found")]
    QuizNotFound(QuizId),
    #[error("user {user_id} may not access video {video_id} yet")]
    AccessDenied { user_id: UserId, video_id: VideoId },
    #[error("progress for user {user_id} kept changing underneath; gave up after {attempts} attempts")]
    WriteContention { user_id: UserId, attempts: u32 },
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProgressionError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotFound(_) | Self::VideoNotFound(_) | Self::QuizNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::WriteContention { .. } => ErrorKind::Conflict,
            Self::Progress(ProgressError::QuizNotPassed { .. }) => ErrorKind::QuizNotPassed,
            Self::Progress(_) => ErrorKind::Invalid,
            Self::Scoring(ScoringError::UnsupportedQuestionType { .. }) => {
                ErrorKind::UnsupportedQuestionType
            }
            Self::Scoring(_) => ErrorKind::Invalid,
            Self::Storage(err) => storage_kind(err),
        }
    }
}

/// Errors emitted by `CatalogService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("video {0} not found")]
    VideoNotFound(VideoId),
    #[error("quiz {0} not found")]
    QuizNotFound(QuizId),
    #[error("video {0} has no quiz")]
    NoQuiz(VideoId),
    #[error("another video already uses order {0}")]
    OrderTaken(u32),
    #[error("video {0} already has a quiz")]
    QuizExists(VideoId),
    #[error(transparent)]
    Video(#[from] VideoError),
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CatalogError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::VideoNotFound(_) | Self::QuizNotFound(_) | Self::NoQuiz(_) => {
                ErrorKind::NotFound
            }
            Self::OrderTaken(_) | Self::QuizExists(_) => ErrorKind::Conflict,
            Self::Quiz(QuizError::UnsupportedQuestionType { .. }) => {
                ErrorKind::UnsupportedQuestionType
            }
            Self::Video(_) | Self::Quiz(_) => ErrorKind::Invalid,
            Self::Storage(err) => storage_kind(err),
        }
    }
}

/// Errors emitted by `UserService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UserServiceError {
    #[error("user {0} not found")]
    NotFound(UserId),
    #[error("email {0} is already registered")]
    EmailTaken(String),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl UserServiceError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::EmailTaken(_) => ErrorKind::Conflict,
            Self::User(_) => ErrorKind::Invalid,
            Self::Storage(err) => storage_kind(err),
        }
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    User(#[from] UserServiceError),
}

impl AppServicesError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Sqlite(_) => ErrorKind::Internal,
            Self::Storage(err) => storage_kind(err),
            Self::User(err) => err.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants_not_messages() {
        let not_passed = ProgressionError::from(ProgressError::QuizNotPassed {
            quiz_id: QuizId::new(1),
            percentage: 50,
            passing_score: 80,
        });
        assert_eq!(not_passed.kind(), ErrorKind::QuizNotPassed);

        let denied = ProgressionError::AccessDenied {
            user_id: UserId::random(),
            video_id: VideoId::new(3),
        };
        assert_eq!(denied.kind(), ErrorKind::AccessDenied);

        let unsupported = ProgressionError::from(ScoringError::UnsupportedQuestionType {
            question: course_core::model::QuestionId::new(1),
            kind: "matching".into(),
        });
        assert_eq!(unsupported.kind(), ErrorKind::UnsupportedQuestionType);

        assert_eq!(
            ProgressionError::from(StorageError::Connection("down".into())).kind(),
            ErrorKind::Internal
        );
        assert_eq!(CatalogError::QuizExists(VideoId::new(1)).kind(), ErrorKind::Conflict);
        assert_eq!(CatalogError::from(QuizError::NoQuestions).kind(), ErrorKind::Invalid);
        assert_eq!(
            UserServiceError::EmailTaken("a@b.c".into()).kind(),
            ErrorKind::Conflict
        );
    }
}
