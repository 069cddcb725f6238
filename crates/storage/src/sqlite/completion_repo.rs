use sqlx::Row;
use tutor_core::ScoreAggregator;
use tutor_core::model::{Curriculum, LessonProgress};

use super::mapping::{lesson_id_to_i64, map_progress_row, ser};
use super::progress_repo::{load_lessons, upsert_aggregate, upsert_progress};
use super::{SqliteRepository, db_err};
use crate::repository::{
    CompletionOutcome, CompletionRepository, SessionCompletion, StorageError,
};

#[async_trait::async_trait]
impl CompletionRepository for SqliteRepository {
    async fn finalize_session(
        &self,
        completion: &SessionCompletion,
        curriculum: &Curriculum,
    ) -> Result<CompletionOutcome, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // The conditional update is the first statement, so concurrent
        // finalizers serialize on the write lock and only one sees a row.
        let frozen = sqlx::query(
            r"
                UPDATE quiz_sessions
                SET is_completed = 1, score = ?1, completed_at = ?2
                WHERE id = ?3 AND user_id = ?4
                  AND is_completed = 0 AND current_question = total_questions
            ",
        )
        .bind(i64::from(completion.score))
        .bind(completion.completed_at)
        .bind(completion.session_id.to_string())
        .bind(completion.user_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        if frozen == 0 {
            let row = sqlx::query("SELECT is_completed, score FROM quiz_sessions WHERE id = ?1")
                .bind(completion.session_id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?
                .ok_or(StorageError::NotFound)?;
            let is_completed: bool = row.try_get("is_completed").map_err(ser)?;
            let score: Option<i64> = row.try_get("score").map_err(ser)?;
            return match (is_completed, score) {
                (true, Some(score)) => Ok(CompletionOutcome::AlreadyFinalized {
                    score: u8::try_from(score).map_err(ser)?,
                }),
                _ => Err(StorageError::Conflict),
            };
        }

        let existing = sqlx::query(
            r"
                SELECT
                    user_id, topic_id, lesson_id, attempts, best_score, last_attempt_score,
                    is_completed, started_at, completed_at, last_attempt_at
                FROM lesson_progress
                WHERE user_id = ?1 AND topic_id = ?2 AND lesson_id = ?3
            ",
        )
        .bind(completion.user_id.as_str())
        .bind(completion.topic_id.as_str())
        .bind(lesson_id_to_i64(completion.lesson_id))
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut progress = match existing {
            Some(row) => map_progress_row(&row)?,
            None => LessonProgress::new(
                completion.user_id.clone(),
                completion.topic_id.clone(),
                completion.lesson_id,
                completion.started_at,
            ),
        };
        let was_completed = progress.is_completed();
        let effect = progress
            .record_attempt(
                f64::from(completion.score),
                completion.passed,
                completion.completed_at,
            )
            .map_err(ser)?;
        upsert_progress(&mut tx, &progress).await?;

        let aggregate = if effect.needs_aggregate_refresh(was_completed) {
            let rows = load_lessons(&mut tx, &completion.user_id).await?;
            let aggregate =
                ScoreAggregator::fold_user(completion.user_id.clone(), curriculum, &rows);
            upsert_aggregate(&mut tx, &aggregate, completion.completed_at).await?;
            Some(aggregate)
        } else {
            None
        };

        tx.commit().await.map_err(db_err)?;

        Ok(CompletionOutcome::Applied {
            score: completion.score,
            progress,
            effect,
            aggregate,
        })
    }
}
