use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the versioned schema migrations.
///
/// Version 1 creates lesson progress, quiz sessions, user aggregates and their
/// indexes, including the partial unique index that allows one incomplete
/// session per user.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS lesson_progress (
                    user_id TEXT NOT NULL,
                    topic_id TEXT NOT NULL,
                    lesson_id INTEGER NOT NULL CHECK (lesson_id >= 0),
                    attempts INTEGER NOT NULL CHECK (attempts >= 0),
                    best_score REAL NOT NULL CHECK (best_score BETWEEN 0 AND 100),
                    last_attempt_score REAL NOT NULL CHECK (last_attempt_score BETWEEN 0 AND 100),
                    is_completed INTEGER NOT NULL CHECK (is_completed IN (0, 1)),
                    started_at TEXT NOT NULL,
                    completed_at TEXT,
                    last_attempt_at TEXT,
                    PRIMARY KEY (user_id, topic_id, lesson_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS quiz_sessions (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    topic_id TEXT NOT NULL,
                    lesson_id INTEGER NOT NULL CHECK (lesson_id >= 0),
                    questions_json TEXT NOT NULL,
                    answers_json TEXT NOT NULL,
                    current_question INTEGER NOT NULL CHECK (current_question >= 0),
                    total_questions INTEGER NOT NULL CHECK (total_questions > 0),
                    is_completed INTEGER NOT NULL CHECK (is_completed IN (0, 1)),
                    score INTEGER CHECK (score BETWEEN 0 AND 100),
                    started_at TEXT NOT NULL,
                    completed_at TEXT
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS user_aggregates (
                    user_id TEXT PRIMARY KEY,
                    total_lessons_completed INTEGER NOT NULL CHECK (total_lessons_completed >= 0),
                    total_score REAL NOT NULL CHECK (total_score BETWEEN 0 AND 100),
                    current_topic TEXT NOT NULL,
                    current_lesson INTEGER NOT NULL CHECK (current_lesson >= 0),
                    updated_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE UNIQUE INDEX IF NOT EXISTS idx_quiz_sessions_one_active
                    ON quiz_sessions (user_id) WHERE is_completed = 0;
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_quiz_sessions_lesson_completed
                    ON quiz_sessions (user_id, topic_id, lesson_id, completed_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_lesson_progress_completed
                    ON lesson_progress (user_id, is_completed);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
