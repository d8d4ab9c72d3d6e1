use course_core::model::{PassingScore, Question, Quiz, QuizId, ValidatedQuiz, VideoId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use super::SqliteRepository;
use super::mapping::{
    db_err, id_i64, map_question_row, question_columns, quiz_id_from_i64, ser, video_id_from_i64,
};
use crate::repository::{QuizRepository, StorageError};

async fn video_exists(
    tx: &mut Transaction<'_, Sqlite>,
    video_id: i64,
) -> Result<bool, StorageError> {
    let row = sqlx::query("SELECT 1 FROM videos WHERE id = ?1")
        .bind(video_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?;
    Ok(row.is_some())
}

async fn insert_questions(
    tx: &mut Transaction<'_, Sqlite>,
    quiz_id: i64,
    questions: &[Question],
) -> Result<(), StorageError> {
    for (position, question) in questions.iter().enumerate() {
        let (kind, correct_answer, options) = question_columns(question)?;
        sqlx::query(
            r"
            INSERT INTO quiz_questions (quiz_id, question_id, position, kind, prompt, points, correct_answer, options)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(quiz_id)
        .bind(id_i64("question_id", question.id.value())?)
        .bind(i64::try_from(position).map_err(ser)?)
        .bind(kind)
        .bind(question.prompt.clone())
        .bind(i64::from(question.points))
        .bind(correct_answer)
        .bind(options)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

async fn set_video_pointer(
    tx: &mut Transaction<'_, Sqlite>,
    video_id: i64,
    quiz_id: Option<i64>,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE videos SET quiz_id = ?2 WHERE id = ?1")
        .bind(video_id)
        .bind(quiz_id)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    Ok(())
}

impl SqliteRepository {
    async fn load_quiz(&self, row: &SqliteRow) -> Result<Quiz, StorageError> {
        let id: i64 = row.try_get("id").map_err(ser)?;
        let passing: i64 = row.try_get("passing_score").map_err(ser)?;
        let passing = u8::try_from(passing).map_err(ser)?;

        let question_rows = sqlx::query(
            r"
            SELECT question_id, kind, prompt, points, correct_answer, options
            FROM quiz_questions
            WHERE quiz_id = ?1
            ORDER BY position ASC
            ",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(Quiz {
            id: quiz_id_from_i64(id)?,
            video_id: video_id_from_i64(row.try_get("video_id").map_err(ser)?)?,
            title: row.try_get("title").map_err(ser)?,
            questions: question_rows
                .iter()
                .map(map_question_row)
                .collect::<Result<_, _>>()?,
            passing_score: PassingScore::new(passing).map_err(ser)?,
            is_active: row.try_get::<i64, _>("is_active").map_err(ser)? != 0,
            created_at: row.try_get("created_at").map_err(ser)?,
        })
    }
}

#[async_trait::async_trait]
impl QuizRepository for SqliteRepository {
    async fn insert_new_quiz(&self, quiz: &ValidatedQuiz) -> Result<QuizId, StorageError> {
        let video_id = id_i64("video_id", quiz.video_id.value())?;
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(db_err)?;

        if !video_exists(&mut tx, video_id).await? {
            return Err(StorageError::NotFound);
        }

        // UNIQUE(video_id) turns a second quiz for the same video into Conflict
        let res = sqlx::query(
            r"
            INSERT INTO quizzes (video_id, title, passing_score, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(video_id)
        .bind(quiz.title.clone())
        .bind(i64::from(quiz.passing_score.value()))
        .bind(i64::from(quiz.is_active))
        .bind(quiz.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        let quiz_id = res.last_insert_rowid();

        insert_questions(&mut tx, quiz_id, &quiz.questions).await?;
        set_video_pointer(&mut tx, video_id, Some(quiz_id)).await?;
        tx.commit().await.map_err(db_err)?;

        quiz_id_from_i64(quiz_id)
    }

    async fn update_quiz(&self, quiz: &Quiz) -> Result<(), StorageError> {
        let quiz_id = id_i64("quiz_id", quiz.id.value())?;
        let video_id = id_i64("video_id", quiz.video_id.value())?;
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(db_err)?;

        let previous_video: Option<i64> = sqlx::query_scalar("SELECT video_id FROM quizzes WHERE id = ?1")
            .bind(quiz_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let Some(previous_video) = previous_video else {
            return Err(StorageError::NotFound);
        };
        if !video_exists(&mut tx, video_id).await? {
            return Err(StorageError::NotFound);
        }

        sqlx::query(
            r"
            UPDATE quizzes
            SET video_id = ?2, title = ?3, passing_score = ?4, is_active = ?5
            WHERE id = ?1
            ",
        )
        .bind(quiz_id)
        .bind(video_id)
        .bind(quiz.title.clone())
        .bind(i64::from(quiz.passing_score.value()))
        .bind(i64::from(quiz.is_active))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM quiz_questions WHERE quiz_id = ?1")
            .bind(quiz_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        insert_questions(&mut tx, quiz_id, &quiz.questions).await?;

        if previous_video != video_id {
            set_video_pointer(&mut tx, previous_video, None).await?;
        }
        set_video_pointer(&mut tx, video_id, Some(quiz_id)).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Option<Quiz>, StorageError> {
        let row = sqlx::query(
            "SELECT id, video_id, title, passing_score, is_active, created_at FROM quizzes WHERE id = ?1",
        )
        .bind(id_i64("quiz_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => self.load_quiz(&row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn get_quiz_for_video(&self, video_id: VideoId) -> Result<Option<Quiz>, StorageError> {
        let row = sqlx::query(
            "SELECT id, video_id, title, passing_score, is_active, created_at FROM quizzes WHERE video_id = ?1",
        )
        .bind(id_i64("video_id", video_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => self.load_quiz(&row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn delete_quiz(&self, id: QuizId) -> Result<bool, StorageError> {
        let quiz_id = id_i64("quiz_id", id.value())?;
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(db_err)?;

        let res = sqlx::query("DELETE FROM quizzes WHERE id = ?1")
            .bind(quiz_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("UPDATE videos SET quiz_id = NULL WHERE quiz_id = ?1")
            .bind(quiz_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(res.rows_affected() > 0)
    }
}
