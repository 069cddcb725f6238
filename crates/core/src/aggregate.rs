use std::collections::HashSet;

use chrono::NaiveDate;

use crate::model::{
    Curriculum, LessonId, LessonProgress, Position, ProgressError, Topic, TopicId, TopicStatus,
    UserId,
};

/// Average best score under which an attempted topic is reported as weak.
pub const WEAK_TOPIC_MAX_AVERAGE: f64 = 80.0;

/// Average best score from which a topic is reported as strong.
pub const STRONG_TOPIC_MIN_AVERAGE: f64 = 90.0;

//
// ─── USER AGGREGATE ────────────────────────────────────────────────────────────
//

/// Stored per-user totals, always the result of a full fold over the
/// user's lesson rows.
#[derive(Debug, Clone, PartialEq)]
pub struct UserAggregate {
    user_id: UserId,
    total_lessons_completed: u32,
    total_score: f64,
    current_position: Position,
}

impl UserAggregate {
    /// Rehydrate an aggregate from storage.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidPersistedState` if `total_score` is not a
    /// percentage or is non-zero with no completed lessons.
    pub fn from_persisted(
        user_id: UserId,
        total_lessons_completed: u32,
        total_score: f64,
        current_position: Position,
    ) -> Result<Self, ProgressError> {
        if !total_score.is_finite() || !(0.0..=100.0).contains(&total_score) {
            return Err(ProgressError::InvalidPersistedState(
                "total_score out of range".into(),
            ));
        }
        if total_lessons_completed == 0 && total_score != 0.0 {
            return Err(ProgressError::InvalidPersistedState(
                "total_score without completed lessons".into(),
            ));
        }
        Ok(Self {
            user_id,
            total_lessons_completed,
            total_score,
            current_position,
        })
    }

    /// Aggregate of a user with no progress.
    #[must_use]
    pub fn empty(user_id: UserId, curriculum: &Curriculum) -> Self {
        Self {
            user_id,
            total_lessons_completed: 0,
            total_score: 0.0,
            current_position: curriculum.first_position(),
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn total_lessons_completed(&self) -> u32 {
        self.total_lessons_completed
    }

    /// Mean best score over completed lessons, 0 when none are completed.
    #[must_use]
    pub fn total_score(&self) -> f64 {
        self.total_score
    }

    /// `None` until at least one lesson is completed.
    #[must_use]
    pub fn average_score(&self) -> Option<f64> {
        (self.total_lessons_completed > 0).then_some(self.total_score)
    }

    #[must_use]
    pub fn current_position(&self) -> &Position {
        &self.current_position
    }
}

//
// ─── TOPIC AGGREGATE ───────────────────────────────────────────────────────────
//

/// Derived per-topic totals; never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicAggregate {
    pub topic_id: TopicId,
    pub completed_lessons: usize,
    pub total_lessons: usize,
    /// Mean best score over the topic's completed lessons.
    pub average_score: Option<f64>,
    pub total_attempts: u32,
    pub status: TopicStatus,
}

impl TopicAggregate {
    #[must_use]
    pub fn completion_percentage(&self) -> f64 {
        percentage(self.completed_lessons, self.total_lessons)
    }

    #[must_use]
    pub fn is_weak(&self) -> bool {
        self.total_attempts > 0
            && self
                .average_score
                .is_none_or(|avg| avg < WEAK_TOPIC_MAX_AVERAGE)
    }

    #[must_use]
    pub fn is_strong(&self) -> bool {
        self.average_score
            .is_some_and(|avg| avg >= STRONG_TOPIC_MIN_AVERAGE)
    }
}

//
// ─── FOLDS ─────────────────────────────────────────────────────────────────────
//

/// Pure folds from lesson rows to derived totals.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreAggregator;

impl ScoreAggregator {
    /// Recompute a user's aggregate from all of their lesson rows.
    ///
    /// Counts and the average cover every completed row; the current position
    /// walks the curriculum.
    #[must_use]
    pub fn fold_user(
        user_id: UserId,
        curriculum: &Curriculum,
        rows: &[LessonProgress],
    ) -> UserAggregate {
        let (count, sum) = rows
            .iter()
            .filter(|row| row.is_completed())
            .fold((0_u32, 0.0_f64), |(count, sum), row| {
                (count.saturating_add(1), sum + row.best_score())
            });
        let total_score = if count == 0 {
            0.0
        } else {
            sum / f64::from(count)
        };

        UserAggregate {
            user_id,
            total_lessons_completed: count,
            total_score,
            current_position: Self::current_position(curriculum, rows),
        }
    }

    /// First position in curriculum order without a completed row, or the
    /// final lesson when everything is completed.
    #[must_use]
    pub fn current_position(curriculum: &Curriculum, rows: &[LessonProgress]) -> Position {
        let completed: HashSet<(&TopicId, LessonId)> = rows
            .iter()
            .filter(|row| row.is_completed())
            .map(|row| (row.topic_id(), row.lesson_id()))
            .collect();

        curriculum
            .positions()
            .find(|pos| !completed.contains(&(&pos.topic_id, pos.lesson_id)))
            .unwrap_or_else(|| curriculum.last_position())
    }

    #[must_use]
    pub fn fold_topic(topic: &Topic, rows: &[LessonProgress]) -> TopicAggregate {
        let topic_rows = rows
            .iter()
            .filter(|row| row.topic_id() == &topic.id && topic.lesson(row.lesson_id()).is_some());

        let mut completed = 0_u32;
        let mut sum = 0.0_f64;
        let mut attempts = 0_u32;
        for row in topic_rows {
            attempts = attempts.saturating_add(row.attempts());
            if row.is_completed() {
                completed = completed.saturating_add(1);
                sum += row.best_score();
            }
        }

        let average_score = (completed > 0).then(|| sum / f64::from(completed));
        let completed = completed as usize;

        TopicAggregate {
            topic_id: topic.id.clone(),
            completed_lessons: completed,
            total_lessons: topic.lessons.len(),
            average_score,
            total_attempts: attempts,
            status: TopicStatus::from_counts(completed, topic.lessons.len()),
        }
    }

    /// Distinct calendar days (UTC) on which a lesson was completed.
    #[must_use]
    pub fn active_days(rows: &[LessonProgress]) -> usize {
        rows.iter()
            .filter_map(LessonProgress::completed_at)
            .map(|at| at.date_naive())
            .collect::<HashSet<NaiveDate>>()
            .len()
    }
}

/// `part / whole * 100`, 0 for an empty whole.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
