use std::collections::HashMap;
use std::sync::Arc;

use storage::repository::{ProgressRepository, ProgressStats, ResetCounts, StorageError};
use tracing::info;
use tutor_core::aggregate::percentage;
use tutor_core::model::{
    Curriculum, Difficulty, LessonId, LessonProgress, LessonStatus, PerformanceLevel, TopicId,
    UserId,
};
use tutor_core::{Availability, ScoreAggregator, TopicAggregate, UnlockPolicy, UserAggregate};

use crate::error::ProgressServiceError;

//
// ─── VIEWS ─────────────────────────────────────────────────────────────────────
//

/// One lesson as shown in a summary.
#[derive(Debug, Clone, PartialEq)]
pub struct LessonRow {
    pub lesson_id: LessonId,
    pub title: String,
    pub status: LessonStatus,
    pub attempts: u32,
    pub best_score: Option<f64>,
    pub performance: Option<PerformanceLevel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicSummary {
    pub title: String,
    pub aggregate: TopicAggregate,
    pub lessons: Vec<LessonRow>,
}

/// Everything the dashboard needs about one learner.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSummary {
    pub user: UserAggregate,
    pub topics: Vec<TopicSummary>,
    /// Completed lessons over all curriculum lessons, in percent.
    pub overall_completion: f64,
    pub weak_topics: Vec<TopicId>,
    pub strong_topics: Vec<TopicId>,
    pub active_days: usize,
}

/// A single lesson's record with its derived status.
#[derive(Debug, Clone, PartialEq)]
pub struct LessonView {
    pub progress: Option<LessonProgress>,
    pub status: LessonStatus,
    pub performance: Option<PerformanceLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalStats {
    pub counts: ProgressStats,
    /// Completed lesson rows over all lesson rows, in percent.
    pub completion_rate: f64,
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Read side of learner progress plus reset.
#[derive(Clone)]
pub struct ProgressService {
    progress: Arc<dyn ProgressRepository>,
    curriculum: Arc<Curriculum>,
}

impl ProgressService {
    #[must_use]
    pub fn new(progress: Arc<dyn ProgressRepository>, curriculum: Arc<Curriculum>) -> Self {
        Self {
            progress,
            curriculum,
        }
    }

    #[must_use]
    pub fn curriculum(&self) -> &Curriculum {
        &self.curriculum
    }

    /// Topics and lessons the user may open, evaluated from current rows.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the rows cannot be read.
    pub async fn available(&self, user: &UserId) -> Result<Availability, ProgressServiceError> {
        let rows = self.progress.list_lessons(user).await?;
        Ok(UnlockPolicy::available(&self.curriculum, &rows))
    }

    /// Aggregate, per-topic breakdown and highlights for a user.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if progress cannot be read.
    pub async fn summary(&self, user: &UserId) -> Result<ProgressSummary, ProgressServiceError> {
        let rows = self.progress.list_lessons(user).await?;
        let aggregate = match self.progress.get_aggregate(user).await {
            Ok(aggregate) => aggregate,
            Err(StorageError::NotFound) => UserAggregate::empty(user.clone(), &self.curriculum),
            Err(err) => return Err(err.into()),
        };
        let availability = UnlockPolicy::available(&self.curriculum, &rows);

        let by_key: HashMap<(&TopicId, LessonId), &LessonProgress> = rows
            .iter()
            .map(|row| ((row.topic_id(), row.lesson_id()), row))
            .collect();

        let mut topics = Vec::with_capacity(self.curriculum.topics().len());
        let mut weak_topics = Vec::new();
        let mut strong_topics = Vec::new();
        let mut completed_total = 0;

        for topic in self.curriculum.topics() {
            let aggregate = ScoreAggregator::fold_topic(topic, &rows);
            completed_total += aggregate.completed_lessons;
            if aggregate.is_weak() {
                weak_topics.push(topic.id.clone());
            }
            if aggregate.is_strong() {
                strong_topics.push(topic.id.clone());
            }

            let lessons = topic
                .lessons
                .iter()
                .map(|lesson| {
                    let row = by_key.get(&(&topic.id, lesson.id)).copied();
                    LessonRow {
                        lesson_id: lesson.id,
                        title: lesson.title.clone(),
                        status: availability.status(&topic.id, lesson.id, row),
                        attempts: row.map_or(0, LessonProgress::attempts),
                        best_score: row
                            .filter(|r| r.attempts() > 0)
                            .map(LessonProgress::best_score),
                        performance: row
                            .filter(|r| r.attempts() > 0)
                            .map(LessonProgress::performance),
                    }
                })
                .collect();

            topics.push(TopicSummary {
                title: topic.title.clone(),
                aggregate,
                lessons,
            });
        }

        Ok(ProgressSummary {
            user: aggregate,
            topics,
            overall_completion: percentage(completed_total, self.curriculum.total_lessons()),
            weak_topics,
            strong_topics,
            active_days: ScoreAggregator::active_days(&rows),
        })
    }

    /// One lesson's progress and status.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::UnknownLesson` for a lesson outside the
    /// curriculum, or `Storage` if progress cannot be read.
    pub async fn lesson(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
    ) -> Result<LessonView, ProgressServiceError> {
        if !self.curriculum.contains(topic, lesson) {
            return Err(ProgressServiceError::UnknownLesson {
                topic: topic.clone(),
                lesson,
            });
        }
        let rows = self.progress.list_lessons(user).await?;
        let availability = UnlockPolicy::available(&self.curriculum, &rows);
        let progress = rows
            .into_iter()
            .find(|row| row.topic_id() == topic && row.lesson_id() == lesson);
        let status = availability.status(topic, lesson, progress.as_ref());
        let performance = progress
            .as_ref()
            .filter(|p| p.attempts() > 0)
            .map(LessonProgress::performance);
        Ok(LessonView {
            progress,
            status,
            performance,
        })
    }

    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the counts cannot be read.
    pub async fn statistics(&self) -> Result<GlobalStats, ProgressServiceError> {
        let counts = self.progress.statistics().await?;
        let completion_rate = percentage(
            usize::try_from(counts.completed_lessons).unwrap_or(usize::MAX),
            usize::try_from(counts.lesson_rows).unwrap_or(usize::MAX),
        );
        Ok(GlobalStats {
            counts,
            completion_rate,
        })
    }

    /// Remove all progress, sessions and the aggregate of a user.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the reset fails; nothing is
    /// removed in that case.
    pub async fn reset(&self, user: &UserId) -> Result<ResetCounts, ProgressServiceError> {
        let counts = self.progress.reset_user(user).await?;
        info!(
            user = %user,
            lessons = counts.lessons,
            sessions = counts.sessions,
            "progress reset"
        );
        Ok(counts)
    }

    /// Difficulty the next quiz on this lesson should target.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if progress cannot be read.
    pub async fn difficulty_for(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
    ) -> Result<Difficulty, ProgressServiceError> {
        Ok(learner_difficulty(self.progress.as_ref(), user, topic, lesson).await?)
    }
}

/// Difficulty from the stored average and failed attempts on the lesson.
pub(crate) async fn learner_difficulty(
    progress: &dyn ProgressRepository,
    user: &UserId,
    topic: &TopicId,
    lesson: LessonId,
) -> Result<Difficulty, StorageError> {
    let average = match progress.get_aggregate(user).await {
        Ok(aggregate) => aggregate.average_score(),
        Err(StorageError::NotFound) => None,
        Err(err) => return Err(err),
    };
    let failed = match progress.get_lesson(user, topic, lesson).await {
        Ok(row) => row.failed_attempts(),
        Err(StorageError::NotFound) => 0,
        Err(err) => return Err(err),
    };
    Ok(Difficulty::for_learner(average, failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::repository::{
        CompletionRepository, InMemoryRepository, QuizSessionRepository, SessionCompletion,
    };
    use tutor_core::model::{
        CurriculumDraft, Lesson, Provenance, QuestionDraft, QuizSession, SessionId, Topic,
    };
    use tutor_core::time::fixed_now;

    fn topic_id(raw: &str) -> TopicId {
        TopicId::new(raw).unwrap()
    }

    fn curriculum() -> Arc<Curriculum> {
        let lessons = |n: u32| {
            (1..=n)
                .map(|id| Lesson {
                    id: LessonId::new(id),
                    title: format!("Lesson {id}"),
                    keywords: Vec::new(),
                })
                .collect()
        };
        Arc::new(
            CurriculumDraft {
                topics: vec![
                    Topic {
                        id: topic_id("basics"),
                        title: "Basics".into(),
                        lessons: lessons(2),
                    },
                    Topic {
                        id: topic_id("continuity"),
                        title: "Continuity".into(),
                        lessons: lessons(2),
                    },
                ],
            }
            .validate()
            .unwrap(),
        )
    }

    /// Run and finalize a one-question session answered `correct`ly or not.
    async fn attempt(repo: &InMemoryRepository, topic: &str, lesson: u32, correct: bool) {
        let user = UserId::new("ada").unwrap();
        let question = QuestionDraft {
            text: "q".into(),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_answer: 0,
            explanation: String::new(),
            difficulty: Difficulty::Intermediate,
            provenance: Provenance::Static,
        }
        .validate()
        .unwrap();
        let mut session = QuizSession::start(
            SessionId::random(),
            user.clone(),
            topic_id(topic),
            LessonId::new(lesson),
            vec![question],
            fixed_now(),
        )
        .unwrap();
        repo.create_session(&session).await.unwrap();
        session.answer(if correct { 0 } else { 1 }).unwrap();
        repo.advance_session(&session).await.unwrap();
        let score = session.compute_score();
        repo.finalize_session(
            &SessionCompletion {
                session_id: session.id(),
                user_id: user,
                topic_id: topic_id(topic),
                lesson_id: LessonId::new(lesson),
                score,
                passed: score >= 67,
                started_at: fixed_now(),
                completed_at: fixed_now(),
            },
            &curriculum(),
        )
        .await
        .unwrap();
    }

    fn service(repo: &Arc<InMemoryRepository>) -> ProgressService {
        ProgressService::new(repo.clone(), curriculum())
    }

    #[tokio::test]
    async fn new_user_sees_first_lesson_of_every_topic() {
        let repo = Arc::new(InMemoryRepository::new());
        let user = UserId::new("ada").unwrap();
        let availability = service(&repo).available(&user).await.unwrap();
        for topic in ["basics", "continuity"] {
            let lessons: Vec<_> = availability
                .lessons(&topic_id(topic))
                .unwrap()
                .iter()
                .copied()
                .collect();
            assert_eq!(lessons, vec![LessonId::new(1)]);
        }
    }

    #[tokio::test]
    async fn summary_reports_statuses_and_highlights() {
        let repo = Arc::new(InMemoryRepository::new());
        attempt(&repo, "basics", 1, true).await;
        attempt(&repo, "continuity", 1, false).await;
        let user = UserId::new("ada").unwrap();

        let summary = service(&repo).summary(&user).await.unwrap();
        assert_eq!(summary.user.total_lessons_completed(), 1);
        assert!((summary.overall_completion - 25.0).abs() < f64::EPSILON);
        assert_eq!(summary.strong_topics, vec![topic_id("basics")]);
        assert_eq!(summary.weak_topics, vec![topic_id("continuity")]);
        assert_eq!(summary.active_days, 1);

        let basics = &summary.topics[0];
        assert_eq!(basics.lessons[0].status, LessonStatus::Completed);
        assert_eq!(basics.lessons[0].performance, Some(PerformanceLevel::Excellent));
        assert_eq!(basics.lessons[1].status, LessonStatus::Available);

        let continuity = &summary.topics[1];
        assert_eq!(continuity.lessons[0].status, LessonStatus::InProgress);
        assert_eq!(continuity.lessons[0].best_score, Some(0.0));
        assert_eq!(continuity.lessons[1].status, LessonStatus::Locked);
    }

    #[tokio::test]
    async fn lesson_view_rejects_unknown_lessons() {
        let repo = Arc::new(InMemoryRepository::new());
        let user = UserId::new("ada").unwrap();
        let err = service(&repo)
            .lesson(&user, &topic_id("basics"), LessonId::new(9))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressServiceError::UnknownLesson { .. }));

        let view = service(&repo)
            .lesson(&user, &topic_id("basics"), LessonId::new(2))
            .await
            .unwrap();
        assert_eq!(view.status, LessonStatus::Locked);
        assert!(view.progress.is_none());
    }

    #[tokio::test]
    async fn difficulty_steps_down_after_repeated_failures() {
        let repo = Arc::new(InMemoryRepository::new());
        let user = UserId::new("ada").unwrap();
        let service = service(&repo);
        let basics = topic_id("basics");

        attempt(&repo, "basics", 1, true).await;
        assert_eq!(
            service.difficulty_for(&user, &basics, LessonId::new(2)).await.unwrap(),
            Difficulty::Advanced
        );

        for _ in 0..3 {
            attempt(&repo, "basics", 2, false).await;
        }
        // The average only covers completed lessons and stays at 100.
        assert_eq!(
            service.difficulty_for(&user, &basics, LessonId::new(2)).await.unwrap(),
            Difficulty::Intermediate
        );
    }

    #[tokio::test]
    async fn statistics_and_reset() {
        let repo = Arc::new(InMemoryRepository::new());
        attempt(&repo, "basics", 1, true).await;
        attempt(&repo, "continuity", 1, false).await;
        let service = service(&repo);

        let stats = service.statistics().await.unwrap();
        assert_eq!(stats.counts.total_users, 1);
        assert_eq!(stats.counts.lesson_rows, 2);
        assert!((stats.completion_rate - 50.0).abs() < f64::EPSILON);

        let user = UserId::new("ada").unwrap();
        let counts = service.reset(&user).await.unwrap();
        assert_eq!(counts.lessons, 2);
        let summary = service.summary(&user).await.unwrap();
        assert_eq!(summary.user.total_lessons_completed(), 0);
        assert!(summary.weak_topics.is_empty());
    }
}
