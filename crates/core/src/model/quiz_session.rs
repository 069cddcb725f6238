use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{LessonId, SessionId, TopicId, UserId};
use crate::model::question::{OPTION_COUNT, Question};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizSessionError {
    #[error("a session needs at least one question")]
    NoQuestions,

    #[error("answer index {index} is out of range")]
    AnswerOutOfRange { index: usize },

    #[error("answer targets question {got}, current question is {expected}")]
    QuestionMismatch { expected: usize, got: usize },

    #[error("session is already completed")]
    AlreadyCompleted,

    #[error("session is not exhausted ({answered}/{total} answered)")]
    NotExhausted { answered: usize, total: usize },

    #[error("invalid persisted session: {0}")]
    InvalidPersistedState(String),
}

//
// ─── ANSWER ────────────────────────────────────────────────────────────────────
//

/// One recorded answer; append-only inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question_index: usize,
    pub chosen_index: usize,
    pub is_correct: bool,
}

/// `round(correct / total * 100)` with halves rounded up, in integer math.
///
/// Returns 0 for an empty total.
#[must_use]
pub fn score_percent(correct: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let correct = correct.min(total);
    let rounded = (correct * 200 + total) / (total * 2);
    u8::try_from(rounded).unwrap_or(100)
}

//
// ─── QUIZ SESSION ──────────────────────────────────────────────────────────────
//

/// One assessment attempt against a frozen question set.
///
/// The current question index is `answers.len()`, so the two can never
/// disagree in memory. Storage keeps both and [`QuizSession::from_persisted`]
/// checks them.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizSession {
    id: SessionId,
    user_id: UserId,
    topic_id: TopicId,
    lesson_id: LessonId,
    questions: Vec<Question>,
    answers: Vec<Answer>,
    score: Option<u8>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl QuizSession {
    /// Start a fresh session with no answers.
    ///
    /// # Errors
    ///
    /// Returns `QuizSessionError::NoQuestions` for an empty question list.
    pub fn start(
        id: SessionId,
        user_id: UserId,
        topic_id: TopicId,
        lesson_id: LessonId,
        questions: Vec<Question>,
        started_at: DateTime<Utc>,
    ) -> Result<Self, QuizSessionError> {
        if questions.is_empty() {
            return Err(QuizSessionError::NoQuestions);
        }
        Ok(Self {
            id,
            user_id,
            topic_id,
            lesson_id,
            questions,
            answers: Vec::new(),
            score: None,
            started_at,
            completed_at: None,
        })
    }

    /// Rehydrate a session from storage.
    ///
    /// # Errors
    ///
    /// Returns `QuizSessionError::InvalidPersistedState` if the stored cursor
    /// disagrees with the answers, answers are out of order, or the completion
    /// fields are inconsistent.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: SessionId,
        user_id: UserId,
        topic_id: TopicId,
        lesson_id: LessonId,
        questions: Vec<Question>,
        answers: Vec<Answer>,
        current_question: usize,
        is_completed: bool,
        score: Option<u8>,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Self, QuizSessionError> {
        let invalid = |msg: &str| QuizSessionError::InvalidPersistedState(msg.to_owned());

        if questions.is_empty() {
            return Err(invalid("no questions"));
        }
        if answers.len() != current_question {
            return Err(invalid("current_question does not match answers"));
        }
        if answers.len() > questions.len() {
            return Err(invalid("more answers than questions"));
        }
        for (position, answer) in answers.iter().enumerate() {
            if answer.question_index != position || answer.chosen_index >= OPTION_COUNT {
                return Err(invalid("answers are not a valid sequence"));
            }
        }
        if is_completed != score.is_some() || is_completed != completed_at.is_some() {
            return Err(invalid("completion fields disagree"));
        }
        if score.is_some_and(|s| s > 100) {
            return Err(invalid("score above 100"));
        }
        if is_completed && answers.len() != questions.len() {
            return Err(invalid("completed before all questions were answered"));
        }

        Ok(Self {
            id,
            user_id,
            topic_id,
            lesson_id,
            questions,
            answers,
            score,
            started_at,
            completed_at,
        })
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn topic_id(&self) -> &TopicId {
        &self.topic_id
    }

    #[must_use]
    pub fn lesson_id(&self) -> LessonId {
        self.lesson_id
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    #[must_use]
    pub fn current_question_index(&self) -> usize {
        self.answers.len()
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        if self.is_completed() {
            return None;
        }
        self.questions.get(self.answers.len())
    }

    #[must_use]
    pub fn total_questions(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.answers.len() == self.questions.len()
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.score.is_some()
    }

    #[must_use]
    pub fn score(&self) -> Option<u8> {
        self.score
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn correct_count(&self) -> usize {
        self.answers.iter().filter(|a| a.is_correct).count()
    }

    /// Score of the answers so far against the full question count.
    #[must_use]
    pub fn compute_score(&self) -> u8 {
        score_percent(self.correct_count(), self.questions.len())
    }

    /// Answer the current question.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyCompleted` for a finished session, `AnswerOutOfRange`
    /// when `chosen` is not a valid option, and `QuestionMismatch` when every
    /// question is already answered.
    pub fn answer(&mut self, chosen: usize) -> Result<Answer, QuizSessionError> {
        let index = self.answers.len();
        self.answer_at(index, chosen)
    }

    /// Answer question `question_index`, which must be the current one.
    ///
    /// # Errors
    ///
    /// See [`QuizSession::answer`].
    pub fn answer_at(
        &mut self,
        question_index: usize,
        chosen: usize,
    ) -> Result<Answer, QuizSessionError> {
        if self.is_completed() {
            return Err(QuizSessionError::AlreadyCompleted);
        }
        if chosen >= OPTION_COUNT {
            return Err(QuizSessionError::AnswerOutOfRange { index: chosen });
        }
        let expected = self.answers.len();
        let Some(question) = self.questions.get(expected) else {
            return Err(QuizSessionError::QuestionMismatch {
                expected,
                got: question_index,
            });
        };
        if question_index != expected {
            return Err(QuizSessionError::QuestionMismatch {
                expected,
                got: question_index,
            });
        }

        let answer = Answer {
            question_index,
            chosen_index: chosen,
            is_correct: question.is_correct(chosen),
        };
        self.answers.push(answer);
        Ok(answer)
    }

    /// Freeze the score. Calling again returns the frozen score unchanged.
    ///
    /// # Errors
    ///
    /// Returns `QuizSessionError::NotExhausted` if questions remain.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<u8, QuizSessionError> {
        if let Some(score) = self.score {
            return Ok(score);
        }
        if !self.is_exhausted() {
            return Err(QuizSessionError::NotExhausted {
                answered: self.answers.len(),
                total: self.questions.len(),
            });
        }
        let score = self.compute_score();
        self.score = Some(score);
        self.completed_at = Some(at);
        Ok(score)
    }

    #[must_use]
    pub fn passed(&self, threshold: u8) -> Option<bool> {
        self.score.map(|score| score >= threshold)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::model::difficulty::Difficulty;
    use crate::model::question::{Provenance, QuestionDraft};

    /// Question whose correct option is `correct`.
    pub(crate) fn question(n: usize, correct: i64) -> Question {
        QuestionDraft {
            text: format!("Question {n}?"),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_answer: correct,
            explanation: String::new(),
            difficulty: Difficulty::Intermediate,
            provenance: Provenance::Static,
        }
        .validate()
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::question;
    use super::*;
    use crate::time::fixed_now;
    use proptest::prelude::*;

    fn session(n: usize) -> QuizSession {
        QuizSession::start(
            SessionId::random(),
            UserId::new("u1").unwrap(),
            TopicId::new("basics").unwrap(),
            LessonId::new(1),
            (0..n).map(|i| question(i, 0)).collect(),
            fixed_now(),
        )
        .unwrap()
    }

    #[test]
    fn answers_advance_cursor() {
        let mut s = session(3);
        assert_eq!(s.current_question_index(), 0);
        let a = s.answer(0).unwrap();
        assert!(a.is_correct);
        let b = s.answer(2).unwrap();
        assert!(!b.is_correct);
        assert_eq!(b.question_index, 1);
        assert_eq!(s.current_question_index(), 2);
        assert_eq!(s.answers().len(), s.current_question_index());
    }

    #[test]
    fn out_of_range_answer_is_rejected_without_advancing() {
        let mut s = session(2);
        assert_eq!(
            s.answer(4).unwrap_err(),
            QuizSessionError::AnswerOutOfRange { index: 4 }
        );
        assert_eq!(s.current_question_index(), 0);
    }

    #[test]
    fn answer_for_wrong_question_is_rejected() {
        let mut s = session(2);
        s.answer(0).unwrap();
        assert_eq!(
            s.answer_at(0, 1).unwrap_err(),
            QuizSessionError::QuestionMismatch { expected: 1, got: 0 }
        );
    }

    #[test]
    fn complete_requires_exhaustion_and_is_idempotent() {
        let mut s = session(3);
        s.answer(0).unwrap();
        s.answer(0).unwrap();
        assert!(matches!(
            s.complete(fixed_now()),
            Err(QuizSessionError::NotExhausted { answered: 2, total: 3 })
        ));
        s.answer(1).unwrap();
        assert_eq!(s.complete(fixed_now()).unwrap(), 67);
        assert_eq!(s.complete(fixed_now()).unwrap(), 67);
        assert_eq!(s.passed(67), Some(true));
        assert_eq!(s.answer(0).unwrap_err(), QuizSessionError::AlreadyCompleted);
    }

    #[test]
    fn persisted_cursor_must_match_answers() {
        let err = QuizSession::from_persisted(
            SessionId::random(),
            UserId::new("u").unwrap(),
            TopicId::new("t").unwrap(),
            LessonId::new(1),
            vec![question(0, 0)],
            vec![],
            1,
            false,
            None,
            fixed_now(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, QuizSessionError::InvalidPersistedState(_)));
    }

    #[test]
    fn score_rounds_half_up() {
        assert_eq!(score_percent(2, 3), 67);
        assert_eq!(score_percent(1, 3), 33);
        assert_eq!(score_percent(1, 8), 13);
        assert_eq!(score_percent(0, 5), 0);
        assert_eq!(score_percent(5, 5), 100);
    }

    proptest! {
        #[test]
        fn score_matches_rounded_ratio(total in 1usize..=10, correct_seed in 0usize..=10) {
            let correct = correct_seed % (total + 1);
            let expected = (correct as f64 / total as f64 * 100.0).round();
            prop_assert_eq!(f64::from(score_percent(correct, total)), expected);
        }
    }
}
