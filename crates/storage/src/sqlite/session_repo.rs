use tutor_core::model::{LessonId, QuizSession, SessionId, TopicId, UserId};

use super::mapping::{lesson_id_to_i64, map_session_row, ser, usize_to_i64};
use super::{SqliteRepository, db_err};
use crate::repository::{QuizSessionRepository, StorageError};

const SESSION_COLUMNS: &str = r"
    id, user_id, topic_id, lesson_id, questions_json, answers_json,
    current_question, is_completed, score, started_at, completed_at
";

#[async_trait::async_trait]
impl QuizSessionRepository for SqliteRepository {
    async fn create_session(&self, session: &QuizSession) -> Result<u64, StorageError> {
        let questions_json = serde_json::to_string(session.questions()).map_err(ser)?;
        let answers_json = serde_json::to_string(session.answers()).map_err(ser)?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Writing first takes the write lock before anything is read.
        let discarded = sqlx::query(
            r"
                DELETE FROM quiz_sessions
                WHERE user_id = ?1 AND is_completed = 0
            ",
        )
        .bind(session.user_id().as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        sqlx::query(
            r"
                INSERT INTO quiz_sessions (
                    id, user_id, topic_id, lesson_id, questions_json, answers_json,
                    current_question, total_questions, is_completed, score,
                    started_at, completed_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, ?9, NULL)
            ",
        )
        .bind(session.id().to_string())
        .bind(session.user_id().as_str())
        .bind(session.topic_id().as_str())
        .bind(lesson_id_to_i64(session.lesson_id()))
        .bind(questions_json)
        .bind(answers_json)
        .bind(usize_to_i64("current_question", session.current_question_index())?)
        .bind(usize_to_i64("total_questions", session.total_questions())?)
        .bind(session.started_at())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(discarded)
    }

    async fn get_session(&self, id: SessionId) -> Result<QuizSession, StorageError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM quiz_sessions WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;

        map_session_row(&row)
    }

    async fn get_active(&self, user: &UserId) -> Result<QuizSession, StorageError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM quiz_sessions WHERE user_id = ?1 AND is_completed = 0"
        );
        let row = sqlx::query(&sql)
            .bind(user.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;

        map_session_row(&row)
    }

    async fn advance_session(&self, session: &QuizSession) -> Result<(), StorageError> {
        let current = session.current_question_index();
        let Some(previous) = current.checked_sub(1) else {
            return Err(StorageError::Conflict);
        };
        let answers_json = serde_json::to_string(session.answers()).map_err(ser)?;

        let res = sqlx::query(
            r"
                UPDATE quiz_sessions
                SET answers_json = ?1, current_question = ?2
                WHERE id = ?3 AND current_question = ?4 AND is_completed = 0
            ",
        )
        .bind(answers_json)
        .bind(usize_to_i64("current_question", current)?)
        .bind(session.id().to_string())
        .bind(usize_to_i64("current_question", previous)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }
        Ok(())
    }

    async fn list_completed(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
        limit: u32,
    ) -> Result<Vec<QuizSession>, StorageError> {
        let sql = format!(
            r"
                SELECT {SESSION_COLUMNS}
                FROM quiz_sessions
                WHERE user_id = ?1 AND topic_id = ?2 AND lesson_id = ?3 AND is_completed = 1
                ORDER BY completed_at DESC, started_at DESC
                LIMIT ?4
            "
        );
        let rows = sqlx::query(&sql)
            .bind(user.as_str())
            .bind(topic.as_str())
            .bind(lesson_id_to_i64(lesson))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(map_session_row).collect()
    }
}
