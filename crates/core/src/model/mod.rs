mod attempt;
mod ids;
mod progress;
mod quiz;
mod user;
mod video;

pub use ids::{OptionId, ParseIdError, QuestionId, QuizId, UserId, VideoId};

pub use attempt::{QuestionResult, QuizAttempt, QuizResult};
pub use progress::{
    CleanupReport, CourseCompletionChange, DEFAULT_WATCH_COMPLETION_THRESHOLD, ProgressError,
    UserProgress, WatchRecord, WatchSession,
};
pub use quiz::{
    AnswerOption, AnswerValue, Answers, PassingScore, Question, QuestionKind, Quiz, QuizDraft,
    QuizError, ValidatedQuiz,
};
pub use user::{Role, User, UserError};
pub use video::{Video, VideoError};
