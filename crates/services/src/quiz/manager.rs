use std::sync::Arc;

use storage::repository::{
    CompletionOutcome, CompletionRepository, QuizSessionRepository, SessionCompletion,
    StorageError,
};
use tracing::{debug, info};
use tutor_core::model::{
    Answer, Curriculum, LessonId, LessonProgress, Question, QuizSession, QuizSessionError,
    SessionId, TopicId, UserId,
};
use tutor_core::{Clock, UserAggregate};

use crate::error::SessionError;

/// Outcome of answering one question.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerFeedback {
    pub answer: Answer,
    pub correct_answer: usize,
    pub explanation: String,
    /// Questions left after this one.
    pub remaining: usize,
    /// `true` when the same answer had already been recorded.
    pub replayed: bool,
}

/// Outcome of finalizing a session.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResult {
    pub session_id: SessionId,
    pub score: u8,
    pub passed: bool,
    /// `false` when an earlier call already finalized the session.
    pub applied: bool,
    /// The lesson moved to completed with this session.
    pub lesson_completed: bool,
    pub progress: Option<LessonProgress>,
    pub aggregate: Option<UserAggregate>,
}

/// Creates, advances and finalizes quiz sessions.
///
/// Every operation reads the durable session and writes back through
/// conditional updates, so retries and concurrent callers are detected
/// instead of applied twice.
#[derive(Clone)]
pub struct QuizSessionManager {
    clock: Clock,
    sessions: Arc<dyn QuizSessionRepository>,
    completions: Arc<dyn CompletionRepository>,
    curriculum: Arc<Curriculum>,
    pass_threshold: u8,
}

impl QuizSessionManager {
    #[must_use]
    pub fn new(
        clock: Clock,
        sessions: Arc<dyn QuizSessionRepository>,
        completions: Arc<dyn CompletionRepository>,
        curriculum: Arc<Curriculum>,
        pass_threshold: u8,
    ) -> Self {
        Self {
            clock,
            sessions,
            completions,
            curriculum,
            pass_threshold,
        }
    }

    #[must_use]
    pub fn pass_threshold(&self) -> u8 {
        self.pass_threshold
    }

    /// Start a session over `questions`, discarding the user's previous
    /// incomplete session in the same write.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Validation` for an empty question list,
    /// `SessionConflict` if another session was created concurrently, or
    /// `Persistence` for storage failures.
    pub async fn create(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
        questions: Vec<Question>,
    ) -> Result<QuizSession, SessionError> {
        let session = QuizSession::start(
            SessionId::random(),
            user.clone(),
            topic.clone(),
            lesson,
            questions,
            self.clock.now(),
        )?;
        let discarded = self
            .sessions
            .create_session(&session)
            .await
            .map_err(|err| match err {
                StorageError::Conflict => SessionError::SessionConflict,
                other => SessionError::Persistence(other),
            })?;
        info!(
            user = %user,
            topic = %topic,
            lesson = %lesson,
            session = %session.id(),
            questions = session.total_questions(),
            discarded,
            "quiz session created"
        );
        Ok(session)
    }

    /// # Errors
    ///
    /// Returns `SessionError::NotFound` when the user has no incomplete
    /// session, or `Persistence` for storage failures.
    pub async fn get_active(&self, user: &UserId) -> Result<QuizSession, SessionError> {
        self.sessions
            .get_active(user)
            .await
            .map_err(|err| match err {
                StorageError::NotFound => SessionError::NotFound,
                other => SessionError::Persistence(other),
            })
    }

    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for an unknown or discarded session.
    pub async fn get(&self, session_id: SessionId) -> Result<QuizSession, SessionError> {
        self.sessions
            .get_session(session_id)
            .await
            .map_err(|err| match err {
                StorageError::NotFound => SessionError::NotFound,
                other => SessionError::Persistence(other),
            })
    }

    /// Answer the session's current question.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Validation` for an out-of-range option,
    /// `StaleSession` if the session was superseded, completed or advanced
    /// concurrently, or `Persistence` for storage failures.
    pub async fn record_answer(
        &self,
        session_id: SessionId,
        chosen: usize,
    ) -> Result<AnswerFeedback, SessionError> {
        let session = self.load_open(session_id).await?;
        let index = session.current_question_index();
        self.apply_answer(session, index, chosen).await
    }

    /// Answer question `question_index`, tolerating a retried delivery.
    ///
    /// When that question already holds the same choice, the stored answer is
    /// returned with `replayed` set and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Validation` when the index is not the current
    /// question (and not an identical replay) or the option is out of range.
    /// Otherwise as [`QuizSessionManager::record_answer`].
    pub async fn record_answer_for(
        &self,
        session_id: SessionId,
        question_index: usize,
        chosen: usize,
    ) -> Result<AnswerFeedback, SessionError> {
        let session = self.get(session_id).await.map_err(|err| match err {
            SessionError::NotFound => SessionError::StaleSession(session_id),
            other => other,
        })?;

        if let Some(previous) = session.answers().get(question_index).copied() {
            if previous.chosen_index == chosen {
                debug!(session = %session_id, question_index, "answer replayed");
                return Ok(feedback(&session, previous, true));
            }
            return Err(QuizSessionError::QuestionMismatch {
                expected: session.current_question_index(),
                got: question_index,
            }
            .into());
        }
        if session.is_completed() {
            return Err(SessionError::StaleSession(session_id));
        }
        self.apply_answer(session, question_index, chosen).await
    }

    /// Freeze the score and record the lesson attempt.
    ///
    /// Repeated calls return the score frozen by the first one and change
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotExhausted` while questions remain,
    /// `StaleSession` for a discarded session, or `Persistence` when the
    /// write fails (nothing is written then).
    pub async fn complete(&self, session_id: SessionId) -> Result<CompletionResult, SessionError> {
        let session = self.get(session_id).await.map_err(|err| match err {
            SessionError::NotFound => SessionError::StaleSession(session_id),
            other => other,
        })?;

        let score = match session.score() {
            Some(score) => score,
            None if session.is_exhausted() => session.compute_score(),
            None => {
                return Err(SessionError::NotExhausted {
                    answered: session.current_question_index(),
                    total: session.total_questions(),
                });
            }
        };
        let passed = score >= self.pass_threshold;

        let completion = SessionCompletion {
            session_id,
            user_id: session.user_id().clone(),
            topic_id: session.topic_id().clone(),
            lesson_id: session.lesson_id(),
            score,
            passed,
            started_at: session.started_at(),
            completed_at: self.clock.now(),
        };
        let outcome = self
            .completions
            .finalize_session(&completion, &self.curriculum)
            .await
            .map_err(|err| match err {
                StorageError::NotFound | StorageError::Conflict => {
                    SessionError::StaleSession(session_id)
                }
                other => SessionError::Persistence(other),
            })?;

        let result = match outcome {
            CompletionOutcome::Applied {
                score,
                progress,
                effect,
                aggregate,
            } => {
                info!(
                    user = %completion.user_id,
                    topic = %completion.topic_id,
                    lesson = %completion.lesson_id,
                    score,
                    passed,
                    lesson_completed = effect.newly_completed,
                    "quiz session completed"
                );
                CompletionResult {
                    session_id,
                    score,
                    passed: score >= self.pass_threshold,
                    applied: true,
                    lesson_completed: effect.newly_completed,
                    progress: Some(progress),
                    aggregate,
                }
            }
            CompletionOutcome::AlreadyFinalized { score } => {
                debug!(session = %session_id, score, "session already finalized");
                CompletionResult {
                    session_id,
                    score,
                    passed: score >= self.pass_threshold,
                    applied: false,
                    lesson_completed: false,
                    progress: None,
                    aggregate: None,
                }
            }
        };
        Ok(result)
    }

    /// Completed sessions for a lesson, newest first.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Persistence` if the sessions cannot be read.
    pub async fn history(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
        limit: u32,
    ) -> Result<Vec<QuizSession>, SessionError> {
        self.sessions
            .list_completed(user, topic, lesson, limit)
            .await
            .map_err(SessionError::Persistence)
    }

    async fn load_open(&self, session_id: SessionId) -> Result<QuizSession, SessionError> {
        let session = self.get(session_id).await.map_err(|err| match err {
            SessionError::NotFound => SessionError::StaleSession(session_id),
            other => other,
        })?;
        if session.is_completed() {
            return Err(SessionError::StaleSession(session_id));
        }
        Ok(session)
    }

    async fn apply_answer(
        &self,
        mut session: QuizSession,
        question_index: usize,
        chosen: usize,
    ) -> Result<AnswerFeedback, SessionError> {
        let answer = session.answer_at(question_index, chosen)?;
        self.sessions
            .advance_session(&session)
            .await
            .map_err(|err| match err {
                StorageError::Conflict | StorageError::NotFound => {
                    SessionError::StaleSession(session.id())
                }
                other => SessionError::Persistence(other),
            })?;
        debug!(
            session = %session.id(),
            question_index,
            correct = answer.is_correct,
            "answer recorded"
        );
        Ok(feedback(&session, answer, false))
    }
}

fn feedback(session: &QuizSession, answer: Answer, replayed: bool) -> AnswerFeedback {
    let question = &session.questions()[answer.question_index];
    AnswerFeedback {
        answer,
        correct_answer: question.correct_answer(),
        explanation: question.explanation().to_owned(),
        remaining: session.total_questions() - session.current_question_index(),
        replayed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::repository::{ProgressRepository, Storage};
    use tutor_core::model::{CurriculumDraft, Difficulty, Lesson, Provenance, QuestionDraft, Topic};
    use tutor_core::time::fixed_clock;

    fn question(correct: i64) -> Question {
        QuestionDraft {
            text: format!("Question with answer {correct}"),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_answer: correct,
            explanation: "because".into(),
            difficulty: Difficulty::Intermediate,
            provenance: Provenance::Static,
        }
        .validate()
        .unwrap()
    }

    fn curriculum() -> Arc<Curriculum> {
        Arc::new(
            CurriculumDraft {
                topics: vec![Topic {
                    id: TopicId::new("basics").unwrap(),
                    title: "Basics".into(),
                    lessons: vec![
                        Lesson {
                            id: LessonId::new(1),
                            title: "One".into(),
                            keywords: Vec::new(),
                        },
                        Lesson {
                            id: LessonId::new(2),
                            title: "Two".into(),
                            keywords: Vec::new(),
                        },
                    ],
                }],
            }
            .validate()
            .unwrap(),
        )
    }

    fn manager(storage: &Storage) -> QuizSessionManager {
        QuizSessionManager::new(
            fixed_clock(),
            Arc::clone(&storage.sessions),
            Arc::clone(&storage.completions),
            curriculum(),
            67,
        )
    }

    fn ids() -> (UserId, TopicId, LessonId) {
        (
            UserId::new("ada").unwrap(),
            TopicId::new("basics").unwrap(),
            LessonId::new(1),
        )
    }

    #[tokio::test]
    async fn full_session_scores_and_completes_lesson() {
        let storage = Storage::in_memory();
        let manager = manager(&storage);
        let (user, topic, lesson) = ids();
        let session = manager
            .create(&user, &topic, lesson, vec![question(0), question(1), question(2)])
            .await
            .unwrap();

        let first = manager.record_answer(session.id(), 0).await.unwrap();
        assert!(first.answer.is_correct);
        assert_eq!(first.remaining, 2);
        manager.record_answer(session.id(), 1).await.unwrap();

        let early = manager.complete(session.id()).await.unwrap_err();
        assert!(matches!(
            early,
            SessionError::NotExhausted {
                answered: 2,
                total: 3
            }
        ));

        let last = manager.record_answer(session.id(), 0).await.unwrap();
        assert!(!last.answer.is_correct);
        assert_eq!(last.correct_answer, 2);
        assert_eq!(last.remaining, 0);

        let result = manager.complete(session.id()).await.unwrap();
        assert_eq!(result.score, 67);
        assert!(result.passed);
        assert!(result.applied);
        assert!(result.lesson_completed);
        assert_eq!(result.aggregate.unwrap().total_lessons_completed(), 1);

        let again = manager.complete(session.id()).await.unwrap();
        assert_eq!(again.score, 67);
        assert!(!again.applied);

        let row = storage.progress.get_lesson(&user, &topic, lesson).await.unwrap();
        assert_eq!(row.attempts(), 1);
    }

    #[tokio::test]
    async fn answers_are_validated_and_retries_replay() {
        let storage = Storage::in_memory();
        let manager = manager(&storage);
        let (user, topic, lesson) = ids();
        let session = manager
            .create(&user, &topic, lesson, vec![question(0), question(1)])
            .await
            .unwrap();

        let err = manager.record_answer(session.id(), 4).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(QuizSessionError::AnswerOutOfRange { index: 4 })
        ));

        manager.record_answer_for(session.id(), 0, 2).await.unwrap();
        let replay = manager.record_answer_for(session.id(), 0, 2).await.unwrap();
        assert!(replay.replayed);
        assert_eq!(manager.get(session.id()).await.unwrap().answers().len(), 1);

        let conflicting = manager.record_answer_for(session.id(), 0, 3).await.unwrap_err();
        assert!(matches!(conflicting, SessionError::Validation(_)));

        let skipped = manager.record_answer_for(session.id(), 5, 0).await.unwrap_err();
        assert!(matches!(skipped, SessionError::Validation(_)));
    }

    #[tokio::test]
    async fn superseded_session_is_stale() {
        let storage = Storage::in_memory();
        let manager = manager(&storage);
        let (user, topic, lesson) = ids();
        let old = manager
            .create(&user, &topic, lesson, vec![question(0)])
            .await
            .unwrap();
        let new = manager
            .create(&user, &topic, lesson, vec![question(1)])
            .await
            .unwrap();

        let err = manager.record_answer(old.id(), 0).await.unwrap_err();
        assert!(matches!(err, SessionError::StaleSession(id) if id == old.id()));
        assert!(err.is_retryable());
        assert_eq!(manager.get_active(&user).await.unwrap().id(), new.id());
    }

    #[tokio::test]
    async fn completed_session_rejects_answers_and_shows_in_history() {
        let storage = Storage::in_memory();
        let manager = manager(&storage);
        let (user, topic, lesson) = ids();
        let session = manager
            .create(&user, &topic, lesson, vec![question(0)])
            .await
            .unwrap();
        manager.record_answer(session.id(), 1).await.unwrap();
        let result = manager.complete(session.id()).await.unwrap();
        assert_eq!(result.score, 0);
        assert!(!result.passed);
        assert!(!result.lesson_completed);
        assert!(result.aggregate.is_none());

        let err = manager.record_answer(session.id(), 0).await.unwrap_err();
        assert!(matches!(err, SessionError::StaleSession(_)));
        assert!(matches!(
            manager.get_active(&user).await,
            Err(SessionError::NotFound)
        ));

        let history = manager.history(&user, &topic, lesson, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].score(), Some(0));
    }

    #[tokio::test]
    async fn empty_question_list_is_rejected() {
        let storage = Storage::in_memory();
        let (user, topic, lesson) = ids();
        let err = manager(&storage)
            .create(&user, &topic, lesson, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(QuizSessionError::NoQuestions)
        ));
    }
}
