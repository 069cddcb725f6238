use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tutor_core::UserAggregate;
use tutor_core::model::{
    Answer, LessonId, LessonProgress, Position, Question, QuizSession, SessionId, TopicId, UserId,
};

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn usize_to_i64(field: &'static str, v: usize) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn lesson_id_to_i64(id: LessonId) -> i64 {
    i64::from(id.value())
}

fn lesson_id_from_i64(v: i64) -> Result<LessonId, StorageError> {
    Ok(LessonId::new(u32_from_i64("lesson_id", v)?))
}

fn user_id(row: &SqliteRow) -> Result<UserId, StorageError> {
    UserId::new(row.try_get::<String, _>("user_id").map_err(ser)?).map_err(ser)
}

fn topic_id(row: &SqliteRow, column: &str) -> Result<TopicId, StorageError> {
    TopicId::new(row.try_get::<String, _>(column).map_err(ser)?).map_err(ser)
}

pub(crate) fn map_progress_row(row: &SqliteRow) -> Result<LessonProgress, StorageError> {
    let attempts = u32_from_i64("attempts", row.try_get::<i64, _>("attempts").map_err(ser)?)?;

    LessonProgress::from_persisted(
        user_id(row)?,
        topic_id(row, "topic_id")?,
        lesson_id_from_i64(row.try_get::<i64, _>("lesson_id").map_err(ser)?)?,
        attempts,
        row.try_get("best_score").map_err(ser)?,
        row.try_get("last_attempt_score").map_err(ser)?,
        row.try_get("is_completed").map_err(ser)?,
        row.try_get("started_at").map_err(ser)?,
        row.try_get("completed_at").map_err(ser)?,
        row.try_get("last_attempt_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_session_row(row: &SqliteRow) -> Result<QuizSession, StorageError> {
    let id: SessionId = row
        .try_get::<String, _>("id")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;

    let questions: Vec<Question> =
        serde_json::from_str(&row.try_get::<String, _>("questions_json").map_err(ser)?)
            .map_err(ser)?;
    let answers: Vec<Answer> =
        serde_json::from_str(&row.try_get::<String, _>("answers_json").map_err(ser)?)
            .map_err(ser)?;

    let current_i64: i64 = row.try_get("current_question").map_err(ser)?;
    let current_question = usize::try_from(current_i64)
        .map_err(|_| StorageError::Serialization(format!("invalid current_question: {current_i64}")))?;

    let score = row
        .try_get::<Option<i64>, _>("score")
        .map_err(ser)?
        .map(|s| {
            u8::try_from(s).map_err(|_| StorageError::Serialization(format!("invalid score: {s}")))
        })
        .transpose()?;

    QuizSession::from_persisted(
        id,
        user_id(row)?,
        topic_id(row, "topic_id")?,
        lesson_id_from_i64(row.try_get::<i64, _>("lesson_id").map_err(ser)?)?,
        questions,
        answers,
        current_question,
        row.try_get("is_completed").map_err(ser)?,
        score,
        row.try_get("started_at").map_err(ser)?,
        row.try_get("completed_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_aggregate_row(row: &SqliteRow) -> Result<UserAggregate, StorageError> {
    let completed = u32_from_i64(
        "total_lessons_completed",
        row.try_get::<i64, _>("total_lessons_completed").map_err(ser)?,
    )?;
    let position = Position::new(
        topic_id(row, "current_topic")?,
        lesson_id_from_i64(row.try_get::<i64, _>("current_lesson").map_err(ser)?)?,
    );

    UserAggregate::from_persisted(
        user_id(row)?,
        completed,
        row.try_get("total_score").map_err(ser)?,
        position,
    )
    .map_err(ser)
}
