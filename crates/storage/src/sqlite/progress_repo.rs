use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use tutor_core::UserAggregate;
use tutor_core::model::{LessonId, LessonProgress, TopicId, UserId};

use super::mapping::{lesson_id_to_i64, map_aggregate_row, map_progress_row, ser};
use super::{SqliteRepository, db_err};
use crate::repository::{ProgressRepository, ProgressStats, ResetCounts, StorageError};

fn u64_from_i64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(super) async fn load_lessons(
    conn: &mut SqliteConnection,
    user: &UserId,
) -> Result<Vec<LessonProgress>, StorageError> {
    let rows = sqlx::query(
        r"
            SELECT
                user_id, topic_id, lesson_id, attempts, best_score, last_attempt_score,
                is_completed, started_at, completed_at, last_attempt_at
            FROM lesson_progress
            WHERE user_id = ?1
            ORDER BY topic_id ASC, lesson_id ASC
        ",
    )
    .bind(user.as_str())
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;

    rows.iter().map(map_progress_row).collect()
}

pub(super) async fn upsert_progress(
    conn: &mut SqliteConnection,
    progress: &LessonProgress,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
            INSERT INTO lesson_progress (
                user_id, topic_id, lesson_id, attempts, best_score, last_attempt_score,
                is_completed, started_at, completed_at, last_attempt_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(user_id, topic_id, lesson_id) DO UPDATE SET
                attempts = excluded.attempts,
                best_score = excluded.best_score,
                last_attempt_score = excluded.last_attempt_score,
                is_completed = excluded.is_completed,
                completed_at = excluded.completed_at,
                last_attempt_at = excluded.last_attempt_at
        ",
    )
    .bind(progress.user_id().as_str())
    .bind(progress.topic_id().as_str())
    .bind(lesson_id_to_i64(progress.lesson_id()))
    .bind(i64::from(progress.attempts()))
    .bind(progress.best_score())
    .bind(progress.last_attempt_score())
    .bind(progress.is_completed())
    .bind(progress.started_at())
    .bind(progress.completed_at())
    .bind(progress.last_attempt_at())
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub(super) async fn upsert_aggregate(
    conn: &mut SqliteConnection,
    aggregate: &UserAggregate,
    updated_at: DateTime<Utc>,
) -> Result<(), StorageError> {
    let position = aggregate.current_position();
    sqlx::query(
        r"
            INSERT INTO user_aggregates (
                user_id, total_lessons_completed, total_score,
                current_topic, current_lesson, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id) DO UPDATE SET
                total_lessons_completed = excluded.total_lessons_completed,
                total_score = excluded.total_score,
                current_topic = excluded.current_topic,
                current_lesson = excluded.current_lesson,
                updated_at = excluded.updated_at
        ",
    )
    .bind(aggregate.user_id().as_str())
    .bind(i64::from(aggregate.total_lessons_completed()))
    .bind(aggregate.total_score())
    .bind(position.topic_id.as_str())
    .bind(lesson_id_to_i64(position.lesson_id))
    .bind(updated_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_lesson(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
    ) -> Result<LessonProgress, StorageError> {
        let row = sqlx::query(
            r"
                SELECT
                    user_id, topic_id, lesson_id, attempts, best_score, last_attempt_score,
                    is_completed, started_at, completed_at, last_attempt_at
                FROM lesson_progress
                WHERE user_id = ?1 AND topic_id = ?2 AND lesson_id = ?3
            ",
        )
        .bind(user.as_str())
        .bind(topic.as_str())
        .bind(lesson_id_to_i64(lesson))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StorageError::NotFound)?;

        map_progress_row(&row)
    }

    async fn list_lessons(&self, user: &UserId) -> Result<Vec<LessonProgress>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        load_lessons(&mut conn, user).await
    }

    async fn get_aggregate(&self, user: &UserId) -> Result<UserAggregate, StorageError> {
        let row = sqlx::query(
            r"
                SELECT user_id, total_lessons_completed, total_score, current_topic, current_lesson
                FROM user_aggregates
                WHERE user_id = ?1
            ",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StorageError::NotFound)?;

        map_aggregate_row(&row)
    }

    async fn statistics(&self) -> Result<ProgressStats, StorageError> {
        let row = sqlx::query(
            r"
                SELECT
                    COUNT(DISTINCT user_id) AS total_users,
                    COUNT(DISTINCT CASE WHEN is_completed = 1 THEN user_id END) AS active_users,
                    COUNT(*) AS lesson_rows,
                    COALESCE(SUM(is_completed), 0) AS completed_lessons
                FROM lesson_progress
            ",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(ProgressStats {
            total_users: u64_from_i64("total_users", row.try_get("total_users").map_err(ser)?)?,
            active_users: u64_from_i64("active_users", row.try_get("active_users").map_err(ser)?)?,
            lesson_rows: u64_from_i64("lesson_rows", row.try_get("lesson_rows").map_err(ser)?)?,
            completed_lessons: u64_from_i64(
                "completed_lessons",
                row.try_get("completed_lessons").map_err(ser)?,
            )?,
        })
    }

    async fn reset_user(&self, user: &UserId) -> Result<ResetCounts, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let lessons = sqlx::query("DELETE FROM lesson_progress WHERE user_id = ?1")
            .bind(user.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();
        let sessions = sqlx::query("DELETE FROM quiz_sessions WHERE user_id = ?1")
            .bind(user.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();
        let aggregate = sqlx::query("DELETE FROM user_aggregates WHERE user_id = ?1")
            .bind(user.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

        tx.commit().await.map_err(db_err)?;

        Ok(ResetCounts {
            lessons,
            sessions,
            aggregate: aggregate > 0,
        })
    }
}
