use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::ids::{LessonId, TopicId, UserId};
use crate::model::status::{LessonStatus, PerformanceLevel};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("score must be a finite percentage in 0..=100, got {0}")]
    InvalidScore(f64),

    #[error("invalid persisted lesson progress: {0}")]
    InvalidPersistedState(String),
}

fn check_score(score: f64) -> Result<f64, ProgressError> {
    if score.is_finite() && (0.0..=100.0).contains(&score) {
        Ok(score)
    } else {
        Err(ProgressError::InvalidScore(score))
    }
}

//
// ─── ATTEMPT EFFECT ────────────────────────────────────────────────────────────
//

/// What a recorded attempt changed, used to decide whether derived totals
/// need recomputing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptEffect {
    /// `is_completed` flipped from false to true on this attempt.
    pub newly_completed: bool,
    /// `best_score` strictly increased on this attempt.
    pub best_improved: bool,
}

impl AttemptEffect {
    /// Whether the user aggregate must be refolded after this attempt.
    ///
    /// Counts only move on the completion transition; the running average also
    /// moves when an already-completed lesson gets a better best score.
    #[must_use]
    pub fn needs_aggregate_refresh(&self, was_completed: bool) -> bool {
        self.newly_completed || (was_completed && self.best_improved)
    }
}

//
// ─── LESSON PROGRESS ───────────────────────────────────────────────────────────
//

/// Durable mastery record for one `(user, topic, lesson)`.
///
/// Mutated only through [`LessonProgress::record_attempt`], which keeps
/// `attempts` and `best_score` non-decreasing and `is_completed` one-way.
#[derive(Debug, Clone, PartialEq)]
pub struct LessonProgress {
    user_id: UserId,
    topic_id: TopicId,
    lesson_id: LessonId,
    attempts: u32,
    best_score: f64,
    last_attempt_score: f64,
    is_completed: bool,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    last_attempt_at: Option<DateTime<Utc>>,
}

impl LessonProgress {
    /// A fresh record with no attempts.
    #[must_use]
    pub fn new(
        user_id: UserId,
        topic_id: TopicId,
        lesson_id: LessonId,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            topic_id,
            lesson_id,
            attempts: 0,
            best_score: 0.0,
            last_attempt_score: 0.0,
            is_completed: false,
            started_at,
            completed_at: None,
            last_attempt_at: None,
        }
    }

    /// Rehydrate a record from storage.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidPersistedState` if scores are out of range,
    /// `best_score` is below `last_attempt_score`, a completed lesson has no
    /// attempts, or `completed_at` disagrees with `is_completed`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        user_id: UserId,
        topic_id: TopicId,
        lesson_id: LessonId,
        attempts: u32,
        best_score: f64,
        last_attempt_score: f64,
        is_completed: bool,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        last_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<Self, ProgressError> {
        let invalid = |msg: &str| ProgressError::InvalidPersistedState(msg.to_owned());

        check_score(best_score).map_err(|_| invalid("best_score out of range"))?;
        check_score(last_attempt_score).map_err(|_| invalid("last_attempt_score out of range"))?;
        if best_score < last_attempt_score {
            return Err(invalid("best_score below last_attempt_score"));
        }
        if is_completed && attempts == 0 {
            return Err(invalid("completed lesson without attempts"));
        }
        if is_completed != completed_at.is_some() {
            return Err(invalid("completed_at does not match is_completed"));
        }

        Ok(Self {
            user_id,
            topic_id,
            lesson_id,
            attempts,
            best_score,
            last_attempt_score,
            is_completed,
            started_at,
            completed_at,
            last_attempt_at,
        })
    }

    /// Apply one finished assessment attempt.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidScore` if `score` is not in `0..=100`.
    pub fn record_attempt(
        &mut self,
        score: f64,
        passed: bool,
        at: DateTime<Utc>,
    ) -> Result<AttemptEffect, ProgressError> {
        let score = check_score(score)?;

        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_score = score;
        self.last_attempt_at = Some(at);

        let best_improved = score > self.best_score;
        if best_improved {
            self.best_score = score;
        }

        let newly_completed = passed && !self.is_completed;
        if newly_completed {
            self.is_completed = true;
            self.completed_at = Some(at);
        }

        Ok(AttemptEffect {
            newly_completed,
            best_improved,
        })
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
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    #[must_use]
    pub fn last_attempt_score(&self) -> f64 {
        self.last_attempt_score
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.is_completed
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
    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.last_attempt_at
    }

    /// Attempts that did not complete the lesson.
    #[must_use]
    pub fn failed_attempts(&self) -> u32 {
        if self.is_completed {
            self.attempts.saturating_sub(1)
        } else {
            self.attempts
        }
    }

    /// Status ignoring lock state; callers combine it with the unlock policy.
    #[must_use]
    pub fn status(&self) -> LessonStatus {
        if self.is_completed {
            LessonStatus::Completed
        } else if self.attempts > 0 {
            LessonStatus::InProgress
        } else {
            LessonStatus::Available
        }
    }

    #[must_use]
    pub fn performance(&self) -> PerformanceLevel {
        PerformanceLevel::for_score(self.best_score)
    }
}
