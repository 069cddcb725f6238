use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tutor_core::model::{
    AttemptEffect, Curriculum, LessonId, LessonProgress, QuizSession, SessionId, TopicId, UserId,
};
use tutor_core::{ScoreAggregator, UserAggregate};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// Everything needed to finalize a session and fold its score into progress.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCompletion {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub topic_id: TopicId,
    pub lesson_id: LessonId,
    pub score: u8,
    pub passed: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Result of [`CompletionRepository::finalize_session`].
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// This call froze the score and recorded the attempt.
    Applied {
        score: u8,
        progress: LessonProgress,
        effect: AttemptEffect,
        /// Present when the user aggregate was refolded.
        aggregate: Option<UserAggregate>,
    },
    /// An earlier call already finalized the session; nothing changed.
    AlreadyFinalized { score: u8 },
}

impl CompletionOutcome {
    #[must_use]
    pub fn score(&self) -> u8 {
        match self {
            CompletionOutcome::Applied { score, .. }
            | CompletionOutcome::AlreadyFinalized { score } => *score,
        }
    }
}

/// Row counts across all users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressStats {
    pub total_users: u64,
    /// Users with at least one completed lesson.
    pub active_users: u64,
    pub lesson_rows: u64,
    pub completed_lessons: u64,
}

/// What a reset removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResetCounts {
    pub lessons: u64,
    pub sessions: u64,
    pub aggregate: bool,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Read side and reset of durable learner progress.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch one lesson's progress.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the lesson was never attempted.
    async fn get_lesson(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
    ) -> Result<LessonProgress, StorageError>;

    /// All lesson rows of a user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the rows cannot be read.
    async fn list_lessons(&self, user: &UserId) -> Result<Vec<LessonProgress>, StorageError>;

    /// Stored aggregate of a user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no lesson has been completed yet.
    async fn get_aggregate(&self, user: &UserId) -> Result<UserAggregate, StorageError>;

    /// Counts across all users.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the counts cannot be read.
    async fn statistics(&self) -> Result<ProgressStats, StorageError>;

    /// Delete every lesson row, session and the aggregate of one user in a
    /// single atomic step.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the deletion fails; nothing is removed then.
    async fn reset_user(&self, user: &UserId) -> Result<ResetCounts, StorageError>;
}

#[async_trait]
pub trait QuizSessionRepository: Send + Sync {
    /// Insert a fresh session, discarding every incomplete session of the
    /// same user in the same transaction.
    ///
    /// Returns the number of discarded sessions.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if another active session appeared
    /// concurrently.
    async fn create_session(&self, session: &QuizSession) -> Result<u64, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the session does not exist.
    async fn get_session(&self, id: SessionId) -> Result<QuizSession, StorageError>;

    /// The user's single incomplete session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if there is none.
    async fn get_active(&self, user: &UserId) -> Result<QuizSession, StorageError>;

    /// Persist a session that gained exactly one answer since it was read.
    ///
    /// The write only applies while the stored cursor is one behind and the
    /// session is still incomplete.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` when the stored session moved on, was
    /// completed, or was discarded.
    async fn advance_session(&self, session: &QuizSession) -> Result<(), StorageError>;

    /// Completed sessions for one lesson, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the rows cannot be read.
    async fn list_completed(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
        limit: u32,
    ) -> Result<Vec<QuizSession>, StorageError>;
}

#[async_trait]
pub trait CompletionRepository: Send + Sync {
    /// Freeze the session score, record the lesson attempt and refold the
    /// user aggregate when needed, all or nothing.
    ///
    /// Only the first call for a session applies; later calls return the
    /// frozen score.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the session was discarded, or other
    /// storage errors (in which case nothing was written).
    async fn finalize_session(
        &self,
        completion: &SessionCompletion,
        curriculum: &Curriculum,
    ) -> Result<CompletionOutcome, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

type LessonKey = (UserId, TopicId, LessonId);

#[derive(Default)]
struct MemoryState {
    lessons: HashMap<LessonKey, LessonProgress>,
    sessions: HashMap<SessionId, QuizSession>,
    aggregates: HashMap<UserId, UserAggregate>,
}

/// In-memory repository for tests and prototyping.
///
/// One lock guards all tables, so every operation is a single atomic step.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

fn newest_first(a: &QuizSession, b: &QuizSession) -> std::cmp::Ordering {
    b.completed_at()
        .cmp(&a.completed_at())
        .then_with(|| b.started_at().cmp(&a.started_at()))
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_lesson(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
    ) -> Result<LessonProgress, StorageError> {
        let guard = self.lock()?;
        guard
            .lessons
            .get(&(user.clone(), topic.clone(), lesson))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn list_lessons(&self, user: &UserId) -> Result<Vec<LessonProgress>, StorageError> {
        let guard = self.lock()?;
        let mut rows: Vec<_> = guard
            .lessons
            .values()
            .filter(|p| p.user_id() == user)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.topic_id(), a.lesson_id()).cmp(&(b.topic_id(), b.lesson_id()))
        });
        Ok(rows)
    }

    async fn get_aggregate(&self, user: &UserId) -> Result<UserAggregate, StorageError> {
        let guard = self.lock()?;
        guard
            .aggregates
            .get(user)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn statistics(&self) -> Result<ProgressStats, StorageError> {
        let guard = self.lock()?;
        let mut users = std::collections::HashSet::new();
        let mut active = std::collections::HashSet::new();
        let mut completed = 0_u64;
        for row in guard.lessons.values() {
            users.insert(row.user_id());
            if row.is_completed() {
                active.insert(row.user_id());
                completed += 1;
            }
        }
        Ok(ProgressStats {
            total_users: users.len() as u64,
            active_users: active.len() as u64,
            lesson_rows: guard.lessons.len() as u64,
            completed_lessons: completed,
        })
    }

    async fn reset_user(&self, user: &UserId) -> Result<ResetCounts, StorageError> {
        let mut guard = self.lock()?;
        let before_lessons = guard.lessons.len();
        guard.lessons.retain(|(u, _, _), _| u != user);
        let before_sessions = guard.sessions.len();
        guard.sessions.retain(|_, s| s.user_id() != user);
        let aggregate = guard.aggregates.remove(user).is_some();
        Ok(ResetCounts {
            lessons: (before_lessons - guard.lessons.len()) as u64,
            sessions: (before_sessions - guard.sessions.len()) as u64,
            aggregate,
        })
    }
}

#[async_trait]
impl QuizSessionRepository for InMemoryRepository {
    async fn create_session(&self, session: &QuizSession) -> Result<u64, StorageError> {
        let mut guard = self.lock()?;
        if guard.sessions.contains_key(&session.id()) {
            return Err(StorageError::Conflict);
        }
        let before = guard.sessions.len();
        guard
            .sessions
            .retain(|_, s| s.user_id() != session.user_id() || s.is_completed());
        let discarded = (before - guard.sessions.len()) as u64;
        guard.sessions.insert(session.id(), session.clone());
        Ok(discarded)
    }

    async fn get_session(&self, id: SessionId) -> Result<QuizSession, StorageError> {
        let guard = self.lock()?;
        guard.sessions.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn get_active(&self, user: &UserId) -> Result<QuizSession, StorageError> {
        let guard = self.lock()?;
        guard
            .sessions
            .values()
            .find(|s| s.user_id() == user && !s.is_completed())
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn advance_session(&self, session: &QuizSession) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let stored = guard
            .sessions
            .get_mut(&session.id())
            .ok_or(StorageError::Conflict)?;
        let expected = session.current_question_index().checked_sub(1);
        if stored.is_completed() || Some(stored.current_question_index()) != expected {
            return Err(StorageError::Conflict);
        }
        *stored = session.clone();
        Ok(())
    }

    async fn list_completed(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
        limit: u32,
    ) -> Result<Vec<QuizSession>, StorageError> {
        let guard = self.lock()?;
        let mut rows: Vec<_> = guard
            .sessions
            .values()
            .filter(|s| {
                s.is_completed()
                    && s.user_id() == user
                    && s.topic_id() == topic
                    && s.lesson_id() == lesson
            })
            .cloned()
            .collect();
        rows.sort_by(newest_first);
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

#[async_trait]
impl CompletionRepository for InMemoryRepository {
    async fn finalize_session(
        &self,
        completion: &SessionCompletion,
        curriculum: &Curriculum,
    ) -> Result<CompletionOutcome, StorageError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let session = state
            .sessions
            .get_mut(&completion.session_id)
            .ok_or(StorageError::NotFound)?;
        if let Some(score) = session.score() {
            return Ok(CompletionOutcome::AlreadyFinalized { score });
        }

        // Work on copies so a failure leaves every table untouched.
        let mut finished = session.clone();
        // An unanswered question left means the caller raced an answer.
        let frozen = finished
            .complete(completion.completed_at)
            .map_err(|_| StorageError::Conflict)?;
        if frozen != completion.score {
            return Err(StorageError::Conflict);
        }

        let key = (
            completion.user_id.clone(),
            completion.topic_id.clone(),
            completion.lesson_id,
        );
        let mut progress = state.lessons.get(&key).cloned().unwrap_or_else(|| {
            LessonProgress::new(
                completion.user_id.clone(),
                completion.topic_id.clone(),
                completion.lesson_id,
                completion.started_at,
            )
        });
        let was_completed = progress.is_completed();
        let effect = progress
            .record_attempt(
                f64::from(completion.score),
                completion.passed,
                completion.completed_at,
            )
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let aggregate = if effect.needs_aggregate_refresh(was_completed) {
            let rows: Vec<_> = state
                .lessons
                .iter()
                .filter(|((u, _, _), _)| u == &completion.user_id)
                .filter(|(k, _)| **k != key)
                .map(|(_, p)| p.clone())
                .chain(std::iter::once(progress.clone()))
                .collect();
            Some(ScoreAggregator::fold_user(
                completion.user_id.clone(),
                curriculum,
                &rows,
            ))
        } else {
            None
        };

        *session = finished;
        state.lessons.insert(key, progress.clone());
        if let Some(agg) = &aggregate {
            state
                .aggregates
                .insert(completion.user_id.clone(), agg.clone());
        }

        Ok(CompletionOutcome::Applied {
            score: frozen,
            progress,
            effect,
            aggregate,
        })
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
    pub sessions: Arc<dyn QuizSessionRepository>,
    pub completions: Arc<dyn CompletionRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let sessions: Arc<dyn QuizSessionRepository> = Arc::new(repo.clone());
        let completions: Arc<dyn CompletionRepository> = Arc::new(repo);
        Self {
            progress,
            sessions,
            completions,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[tokio::test]
    async fn creating_a_session_discards_previous_incomplete_one() {
        let repo = InMemoryRepository::new();
        let first = session("u1", "basics", 1, 2);
        let second = session("u1", "basics", 1, 2);
        assert_eq!(repo.create_session(&first).await.unwrap(), 0);
        assert_eq!(repo.create_session(&second).await.unwrap(), 1);

        assert!(matches!(
            repo.get_session(first.id()).await,
            Err(StorageError::NotFound)
        ));
        assert_eq!(repo.get_active(&user("u1")).await.unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn advance_rejects_stale_cursor() {
        let repo = InMemoryRepository::new();
        let mut s = session("u1", "basics", 1, 3);
        repo.create_session(&s).await.unwrap();

        s.answer(0).unwrap();
        repo.advance_session(&s).await.unwrap();
        // Same write again: stored cursor already moved.
        assert!(matches!(
            repo.advance_session(&s).await,
            Err(StorageError::Conflict)
        ));
    }

    #[tokio::test]
    async fn finalize_is_applied_once() {
        let repo = InMemoryRepository::new();
        let curriculum = curriculum();
        let mut s = session("u1", "basics", 1, 2);
        repo.create_session(&s).await.unwrap();
        for _ in 0..2 {
            s.answer(0).unwrap();
            repo.advance_session(&s).await.unwrap();
        }

        let completion = completion(&s, 100, true);
        let first = repo.finalize_session(&completion, &curriculum).await.unwrap();
        let second = repo.finalize_session(&completion, &curriculum).await.unwrap();

        assert!(matches!(first, CompletionOutcome::Applied { aggregate: Some(_), .. }));
        assert_eq!(second, CompletionOutcome::AlreadyFinalized { score: 100 });

        let progress = repo
            .get_lesson(&user("u1"), &topic("basics"), LessonId::new(1))
            .await
            .unwrap();
        assert_eq!(progress.attempts(), 1);
        let agg = repo.get_aggregate(&user("u1")).await.unwrap();
        assert_eq!(agg.total_lessons_completed(), 1);
    }

    #[tokio::test]
    async fn reset_removes_only_that_user() {
        let repo = InMemoryRepository::new();
        let curriculum = curriculum();
        for user_id in ["u1", "u2"] {
            let mut s = session(user_id, "basics", 1, 1);
            repo.create_session(&s).await.unwrap();
            s.answer(0).unwrap();
            repo.advance_session(&s).await.unwrap();
            repo.finalize_session(&completion(&s, 100, true), &curriculum)
                .await
                .unwrap();
        }

        let counts = repo.reset_user(&user("u1")).await.unwrap();
        assert_eq!(
            counts,
            ResetCounts {
                lessons: 1,
                sessions: 1,
                aggregate: true
            }
        );
        let stats = repo.statistics().await.unwrap();
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.completed_lessons, 1);
    }
}
