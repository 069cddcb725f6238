use std::sync::Arc;

use tracing::info;
use tutor_core::Availability;
use tutor_core::model::{LessonId, QuizSession, SessionId, TopicId, UserId};

use super::manager::{AnswerFeedback, CompletionResult, QuizSessionManager};
use crate::error::QuizFlowError;
use crate::progress_service::ProgressService;
use crate::supplier::{QuestionSupplier, SupplyReport};

/// A freshly created session and how its questions were obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedQuiz {
    pub session: QuizSession,
    pub report: SupplyReport,
}

/// A finalized session with the content now open to the learner.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedQuiz {
    pub result: CompletionResult,
    pub availability: Availability,
}

/// Drives one lesson attempt from question supply to completion.
#[derive(Clone)]
pub struct QuizFlow {
    progress: Arc<ProgressService>,
    supplier: Arc<QuestionSupplier>,
    manager: Arc<QuizSessionManager>,
    questions_per_lesson: usize,
}

impl QuizFlow {
    #[must_use]
    pub fn new(
        progress: Arc<ProgressService>,
        supplier: Arc<QuestionSupplier>,
        manager: Arc<QuizSessionManager>,
        questions_per_lesson: usize,
    ) -> Self {
        Self {
            progress,
            supplier,
            manager,
            questions_per_lesson,
        }
    }

    /// Start an attempt on an unlocked lesson.
    ///
    /// Questions are supplied before the session write, so slow generation
    /// never overlaps a storage transaction.
    ///
    /// # Errors
    ///
    /// Returns `QuizFlowError::UnknownLesson` or `LessonLocked` before any
    /// question is generated, or the supplier and session errors otherwise.
    pub async fn start(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
    ) -> Result<StartedQuiz, QuizFlowError> {
        if !self.progress.curriculum().contains(topic, lesson) {
            return Err(QuizFlowError::UnknownLesson {
                topic: topic.clone(),
                lesson,
            });
        }
        let availability = self.progress.available(user).await?;
        if !availability.is_lesson_unlocked(topic, lesson) {
            return Err(QuizFlowError::LessonLocked {
                topic: topic.clone(),
                lesson,
            });
        }

        let (questions, report) = self
            .supplier
            .generate_with_report(user, topic, lesson, self.questions_per_lesson)
            .await?;
        let session = self.manager.create(user, topic, lesson, questions).await?;
        info!(
            session = %session.id(),
            served_by = report.served_by,
            difficulty = %report.difficulty,
            "quiz started"
        );
        Ok(StartedQuiz { session, report })
    }

    /// # Errors
    ///
    /// See [`QuizSessionManager::record_answer`].
    pub async fn answer(
        &self,
        session_id: SessionId,
        chosen: usize,
    ) -> Result<AnswerFeedback, QuizFlowError> {
        Ok(self.manager.record_answer(session_id, chosen).await?)
    }

    /// Finalize the session and re-evaluate what the learner may open.
    ///
    /// # Errors
    ///
    /// See [`QuizSessionManager::complete`]; also fails if progress cannot be
    /// read afterwards.
    pub async fn finish(&self, session_id: SessionId) -> Result<FinishedQuiz, QuizFlowError> {
        let result = self.manager.complete(session_id).await?;
        let session = self.manager.get(session_id).await?;
        let availability = self.progress.available(session.user_id()).await?;
        Ok(FinishedQuiz {
            result,
            availability,
        })
    }
}
