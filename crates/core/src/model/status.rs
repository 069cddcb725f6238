use serde::{Deserialize, Serialize};

/// Coarse performance band for a percentage score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceLevel {
    Excellent,
    Good,
    Satisfactory,
    Poor,
}

impl PerformanceLevel {
    pub const EXCELLENT_MIN: f64 = 90.0;
    pub const GOOD_MIN: f64 = 80.0;
    pub const SATISFACTORY_MIN: f64 = 60.0;

    #[must_use]
    pub fn for_score(score: f64) -> Self {
        if score >= Self::EXCELLENT_MIN {
            PerformanceLevel::Excellent
        } else if score >= Self::GOOD_MIN {
            PerformanceLevel::Good
        } else if score >= Self::SATISFACTORY_MIN {
            PerformanceLevel::Satisfactory
        } else {
            PerformanceLevel::Poor
        }
    }
}

/// Where a learner stands on one lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Locked,
    Available,
    /// Attempted at least once, not yet passed.
    InProgress,
    Completed,
}

impl LessonStatus {
    #[must_use]
    pub fn is_accessible(self) -> bool {
        !matches!(self, LessonStatus::Locked)
    }
}

/// Where a learner stands on one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    Available,
    InProgress,
    Completed,
}

impl TopicStatus {
    #[must_use]
    pub fn from_counts(completed_lessons: usize, total_lessons: usize) -> Self {
        if completed_lessons == 0 {
            TopicStatus::Available
        } else if completed_lessons >= total_lessons {
            TopicStatus::Completed
        } else {
            TopicStatus::InProgress
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn performance_bands() {
        assert_eq!(PerformanceLevel::for_score(100.0), PerformanceLevel::Excellent);
        assert_eq!(PerformanceLevel::for_score(80.0), PerformanceLevel::Good);
        assert_eq!(PerformanceLevel::for_score(67.0), PerformanceLevel::Satisfactory);
        assert_eq!(PerformanceLevel::for_score(59.9), PerformanceLevel::Poor);
    }

    #[test]
    fn topic_status_from_counts() {
        assert_eq!(TopicStatus::from_counts(0, 3), TopicStatus::Available);
        assert_eq!(TopicStatus::from_counts(1, 3), TopicStatus::InProgress);
        assert_eq!(TopicStatus::from_counts(3, 3), TopicStatus::Completed);
    }
}
