use course_core::model::{
    AnswerOption, Question, QuestionId, QuestionKind, QuizId, Role, User, UserId, UserProgress,
    Video, VideoId,
};
use sqlx::Row;
use sqlx::error::ErrorKind;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Classify driver errors: constraint hits become domain-level conflicts.
pub(crate) fn db_err(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &e {
        match db.kind() {
            ErrorKind::UniqueViolation => return StorageError::Conflict,
            ErrorKind::ForeignKeyViolation => return StorageError::NotFound,
            _ => {}
        }
    }
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn video_id_from_i64(v: i64) -> Result<VideoId, StorageError> {
    Ok(VideoId::new(i64_to_u64("video_id", v)?))
}

pub(crate) fn quiz_id_from_i64(v: i64) -> Result<QuizId, StorageError> {
    Ok(QuizId::new(i64_to_u64("quiz_id", v)?))
}

pub(crate) fn user_id_from_str(raw: &str) -> Result<UserId, StorageError> {
    raw.parse().map_err(ser)
}

pub(crate) fn map_video_row(row: &SqliteRow) -> Result<Video, StorageError> {
    Video::from_persisted(
        video_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        row.try_get::<String, _>("title").map_err(ser)?,
        u32_from_i64("sort_order", row.try_get::<i64, _>("sort_order").map_err(ser)?)?,
        row.try_get::<i64, _>("is_published").map_err(ser)? != 0,
        u32_from_i64(
            "duration_secs",
            row.try_get::<i64, _>("duration_secs").map_err(ser)?,
        )?,
        row.try_get::<Option<i64>, _>("quiz_id")
            .map_err(ser)?
            .map(quiz_id_from_i64)
            .transpose()?,
        row.try_get("created_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_user_row(row: &SqliteRow) -> Result<User, StorageError> {
    let id: String = row.try_get("id").map_err(ser)?;
    let role: String = row.try_get("role").map_err(ser)?;
    User::new(
        user_id_from_str(&id)?,
        row.try_get::<String, _>("email").map_err(ser)?,
        row.try_get("display_name").map_err(ser)?,
        Role::parse(&role).map_err(ser)?,
        row.try_get("created_at").map_err(ser)?,
    )
    .map_err(ser)
}

/// Column values for one `quiz_questions` row: (kind, correct_answer, options JSON).
pub(crate) fn question_columns(
    question: &Question,
) -> Result<(String, Option<String>, Option<String>), StorageError> {
    let kind = question.kind.as_str().to_owned();
    Ok(match &question.kind {
        QuestionKind::MultipleChoice { options } => {
            (kind, None, Some(serde_json::to_string(options).map_err(ser)?))
        }
        QuestionKind::TrueFalse { correct_answer } => (kind, Some(correct_answer.to_string()), None),
        QuestionKind::TextInput { correct_answer } => (kind, Some(correct_answer.clone()), None),
        QuestionKind::Unsupported { .. } => (kind, None, None),
    })
}

/// Rebuild a question. Unknown kinds come back as `QuestionKind::Unsupported`
/// so scoring can report them instead of the whole quiz failing to load.
pub(crate) fn map_question_row(row: &SqliteRow) -> Result<Question, StorageError> {
    let id = QuestionId::new(i64_to_u64(
        "question_id",
        row.try_get::<i64, _>("question_id").map_err(ser)?,
    )?);
    let kind: String = row.try_get("kind").map_err(ser)?;
    let correct: Option<String> = row.try_get("correct_answer").map_err(ser)?;
    let options: Option<String> = row.try_get("options").map_err(ser)?;

    let missing = || StorageError::Serialization(format!("question {id} is missing its answer"));
    let kind = match kind.as_str() {
        "multiple-choice" => {
            let raw = options.ok_or_else(missing)?;
            let options: Vec<AnswerOption> = serde_json::from_str(&raw).map_err(ser)?;
            QuestionKind::MultipleChoice { options }
        }
        "true-false" => {
            let raw = correct.ok_or_else(missing)?;
            let correct_answer = raw
                .parse::<bool>()
                .map_err(|_| StorageError::Serialization(format!("invalid boolean: {raw}")))?;
            QuestionKind::TrueFalse { correct_answer }
        }
        "text-input" => QuestionKind::TextInput {
            correct_answer: correct.ok_or_else(missing)?,
        },
        _ => QuestionKind::Unsupported { kind },
    };

    Ok(Question::new(
        id,
        row.try_get::<String, _>("prompt").map_err(ser)?,
        u32_from_i64("points", row.try_get::<i64, _>("points").map_err(ser)?)?,
        kind,
    ))
}

pub(crate) fn encode_progress(progress: &UserProgress) -> Result<String, StorageError> {
    serde_json::to_string(progress).map_err(ser)
}

pub(crate) fn map_progress_row(row: &SqliteRow) -> Result<UserProgress, StorageError> {
    let document: String = row.try_get("document").map_err(ser)?;
    let version = i64_to_u64("version", row.try_get::<i64, _>("version").map_err(ser)?)?;
    let progress: UserProgress = serde_json::from_str(&document).map_err(ser)?;
    Ok(progress.with_version(version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::model::OptionId;

    #[test]
    fn question_columns_encode_by_kind() {
        let mc = Question::new(
            QuestionId::new(1),
            "Pick",
            2,
            QuestionKind::MultipleChoice {
                options: vec![AnswerOption::new(OptionId::new(1), "a", true)],
            },
        );
        let (kind, correct, options) = question_columns(&mc).unwrap();
        assert_eq!(kind, "multiple-choice");
        assert!(correct.is_none());
        assert!(options.unwrap().contains("isCorrect"));

        let tf = Question::new(
            QuestionId::new(2),
            "Sure?",
            1,
            QuestionKind::TrueFalse {
                correct_answer: false,
            },
        );
        let (kind, correct, options) = question_columns(&tf).unwrap();
        assert_eq!(kind, "true-false");
        assert_eq!(correct.as_deref(), Some("false"));
        assert!(options.is_none());
    }
}
