//! Question supply with an ordered fallback chain.
//!
//! Strategies are tried in order under a per-tier timeout and an overall
//! deadline. When none of them serves, placeholder questions are
//! synthesized, so a valid request always yields exactly `count` questions.

mod grounded;
mod parse;
mod placeholder;
mod static_bank;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{Instant, timeout};
use storage::repository::ProgressRepository;
use tracing::{debug, warn};
use tutor_core::model::{Curriculum, Difficulty, LessonId, Question, TopicId, UserId};

use crate::ai::{KnowledgeIndex, TextGenerator};
use crate::config::{GenerationConfig, MAX_QUESTIONS_PER_LESSON};
use crate::error::SupplierError;
use crate::progress_service::learner_difficulty;

pub use grounded::{GenerationTrace, GroundedGeneration};
pub use parse::{MalformedResponse, ParsedBatch, parse_questions};
pub use placeholder::placeholder_questions;
pub use static_bank::StaticBank;

//
// ─── TIER CONTRACT ─────────────────────────────────────────────────────────────
//

/// Everything a tier needs to produce questions for one lesson.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplyRequest {
    pub user_id: UserId,
    pub topic_id: TopicId,
    pub topic_title: String,
    pub lesson_id: LessonId,
    pub lesson_title: String,
    pub keywords: Vec<String>,
    pub count: usize,
    pub difficulty: Difficulty,
}

/// Why a tier did not serve. Never returned to callers of the supplier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TierFailure {
    #[error("tier is not configured")]
    Disabled,
    #[error("no source material matched the lesson")]
    NoMaterial,
    #[error("no curated questions for the lesson")]
    NoEntries,
    #[error("backend failed: {0}")]
    Backend(String),
    #[error("response is not a question list: {0}")]
    Malformed(String),
    #[error("only {got} of {needed} questions were usable")]
    TooFew { got: usize, needed: usize },
    #[error("timed out")]
    TimedOut,
}

/// One stage of the fallback chain.
#[async_trait]
pub trait QuestionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce at least `request.count` questions or fail.
    ///
    /// # Errors
    ///
    /// Returns `TierFailure` when the tier cannot serve this request.
    async fn supply(&self, request: &SupplyRequest) -> Result<Vec<Question>, TierFailure>;
}

//
// ─── REPORT ────────────────────────────────────────────────────────────────────
//

pub const PLACEHOLDER_TIER: &str = "placeholder";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierOutcome {
    Served,
    Failed(TierFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierAttempt {
    pub tier: &'static str,
    pub outcome: TierOutcome,
    pub elapsed: Duration,
}

/// How a batch of questions was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplyReport {
    pub difficulty: Difficulty,
    pub attempts: Vec<TierAttempt>,
    pub served_by: &'static str,
}

impl SupplyReport {
    /// Whether every data tier failed and placeholders were returned.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.served_by == PLACEHOLDER_TIER
    }
}

//
// ─── SUPPLIER ──────────────────────────────────────────────────────────────────
//

/// Adaptive question supply for a lesson.
#[derive(Clone)]
pub struct QuestionSupplier {
    strategies: Vec<Arc<dyn QuestionStrategy>>,
    progress: Arc<dyn ProgressRepository>,
    curriculum: Arc<Curriculum>,
    tier_timeout: Duration,
    total_timeout: Duration,
}

impl QuestionSupplier {
    #[must_use]
    pub fn new(
        strategies: Vec<Arc<dyn QuestionStrategy>>,
        progress: Arc<dyn ProgressRepository>,
        curriculum: Arc<Curriculum>,
        generation: &GenerationConfig,
    ) -> Self {
        Self {
            strategies,
            progress,
            curriculum,
            tier_timeout: generation.tier_timeout(),
            total_timeout: generation.total_timeout(),
        }
    }

    /// Exactly `count` questions for the lesson.
    ///
    /// # Errors
    ///
    /// Returns `SupplierError::InvalidCount` unless `count` is within
    /// `1..=MAX_QUESTIONS_PER_LESSON`. No other failure is reported.
    pub async fn generate(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
        count: usize,
    ) -> Result<Vec<Question>, SupplierError> {
        self.generate_with_report(user, topic, lesson, count)
            .await
            .map(|(questions, _)| questions)
    }

    /// Like [`QuestionSupplier::generate`], also describing which tiers ran.
    ///
    /// # Errors
    ///
    /// See [`QuestionSupplier::generate`].
    pub async fn generate_with_report(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
        count: usize,
    ) -> Result<(Vec<Question>, SupplyReport), SupplierError> {
        if !(1..=MAX_QUESTIONS_PER_LESSON).contains(&count) {
            return Err(SupplierError::InvalidCount {
                got: count,
                max: MAX_QUESTIONS_PER_LESSON,
            });
        }

        let deadline = Instant::now() + self.total_timeout;
        let difficulty = self.difficulty(user, topic, lesson, deadline).await;
        let request = self.request(user, topic, lesson, count, difficulty);

        let mut attempts = Vec::with_capacity(self.strategies.len() + 1);

        for strategy in &self.strategies {
            let started = Instant::now();
            let remaining = deadline.saturating_duration_since(started);
            let result = if remaining.is_zero() {
                Err(TierFailure::TimedOut)
            } else {
                match timeout(self.tier_timeout.min(remaining), strategy.supply(&request)).await {
                    Ok(result) => result.and_then(|questions| exact(questions, count)),
                    Err(_) => Err(TierFailure::TimedOut),
                }
            };
            let elapsed = started.elapsed();

            match result {
                Ok(questions) => {
                    attempts.push(TierAttempt {
                        tier: strategy.name(),
                        outcome: TierOutcome::Served,
                        elapsed,
                    });
                    debug!(
                        user = %user,
                        topic = %topic,
                        lesson = %lesson,
                        tier = strategy.name(),
                        "questions supplied"
                    );
                    let report = SupplyReport {
                        difficulty,
                        attempts,
                        served_by: strategy.name(),
                    };
                    return Ok((questions, report));
                }
                Err(failure) => {
                    debug!(tier = strategy.name(), reason = %failure, "tier failed");
                    attempts.push(TierAttempt {
                        tier: strategy.name(),
                        outcome: TierOutcome::Failed(failure),
                        elapsed,
                    });
                }
            }
        }

        warn!(
            user = %user,
            topic = %topic,
            lesson = %lesson,
            tiers = attempts.len(),
            "every question source failed, serving placeholders"
        );
        let questions = placeholder_questions(&request);
        attempts.push(TierAttempt {
            tier: PLACEHOLDER_TIER,
            outcome: TierOutcome::Served,
            elapsed: Duration::ZERO,
        });
        let report = SupplyReport {
            difficulty,
            attempts,
            served_by: PLACEHOLDER_TIER,
        };
        Ok((questions, report))
    }

    /// Progress reads share the chain's deadline.
    async fn difficulty(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
        deadline: Instant,
    ) -> Difficulty {
        let limit = self
            .tier_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        let lookup = learner_difficulty(self.progress.as_ref(), user, topic, lesson);
        match timeout(limit, lookup).await {
            Ok(Ok(difficulty)) => difficulty,
            Ok(Err(err)) => {
                warn!(user = %user, error = %err, "progress unavailable, using default difficulty");
                Difficulty::for_learner(None, 0)
            }
            Err(_) => {
                warn!(user = %user, limit = ?limit, "progress lookup timed out, using default difficulty");
                Difficulty::for_learner(None, 0)
            }
        }
    }

    fn request(
        &self,
        user: &UserId,
        topic: &TopicId,
        lesson: LessonId,
        count: usize,
        difficulty: Difficulty,
    ) -> SupplyRequest {
        let topic_entry = self.curriculum.topic(topic);
        let lesson_entry = topic_entry.and_then(|t| t.lesson(lesson));
        SupplyRequest {
            user_id: user.clone(),
            topic_id: topic.clone(),
            topic_title: topic_entry.map_or_else(|| topic.to_string(), |t| t.title.clone()),
            lesson_id: lesson,
            lesson_title: lesson_entry
                .map_or_else(|| format!("Lesson {lesson}"), |l| l.title.clone()),
            keywords: lesson_entry.map(|l| l.keywords.clone()).unwrap_or_default(),
            count,
            difficulty,
        }
    }
}

/// Grounded generation first, then the curated bank.
#[must_use]
pub fn standard_chain(
    index: Arc<dyn KnowledgeIndex>,
    generator: Arc<dyn TextGenerator>,
    bank: StaticBank,
    top_k: usize,
) -> Vec<Arc<dyn QuestionStrategy>> {
    vec![
        Arc::new(GroundedGeneration::new(index, generator, top_k)),
        Arc::new(bank),
    ]
}

fn exact(mut questions: Vec<Question>, count: usize) -> Result<Vec<Question>, TierFailure> {
    if questions.len() < count {
        return Err(TierFailure::TooFew {
            got: questions.len(),
            needed: count,
        });
    }
    questions.truncate(count);
    Ok(questions)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use storage::repository::{InMemoryRepository, ProgressStats, ResetCounts, StorageError};
    use tutor_core::UserAggregate;
    use tutor_core::model::{CurriculumDraft, Lesson, LessonProgress, Provenance, Topic};

    pub(crate) fn request(count: usize) -> SupplyRequest {
        SupplyRequest {
            user_id: UserId::new("learner").unwrap(),
            topic_id: TopicId::new("business_continuity").unwrap(),
            topic_title: "Business continuity".into(),
            lesson_id: LessonId::new(1),
            lesson_title: "Recovery objectives".into(),
            keywords: vec!["recovery".into(), "time".into(), "objective".into()],
            count,
            difficulty: Difficulty::Intermediate,
        }
    }

    fn curriculum() -> Arc<Curriculum> {
        Arc::new(
            CurriculumDraft {
                topics: vec![Topic {
                    id: TopicId::new("business_continuity").unwrap(),
                    title: "Business continuity".into(),
                    lessons: vec![Lesson {
                        id: LessonId::new(1),
                        title: "Recovery objectives".into(),
                        keywords: vec!["recovery".into()],
                    }],
                }],
            }
            .validate()
            .unwrap(),
        )
    }

    /// Fails, succeeds with a fixed batch, or hangs.
    enum Fake {
        Fail,
        Serve(usize),
        Hang,
    }

    #[async_trait]
    impl QuestionStrategy for Fake {
        fn name(&self) -> &'static str {
            match self {
                Fake::Fail => "fail",
                Fake::Serve(_) => "serve",
                Fake::Hang => "hang",
            }
        }

        async fn supply(&self, request: &SupplyRequest) -> Result<Vec<Question>, TierFailure> {
            match self {
                Fake::Fail => Err(TierFailure::NoEntries),
                Fake::Serve(n) => {
                    let mut questions = placeholder_questions(&SupplyRequest {
                        count: *n,
                        ..request.clone()
                    });
                    for q in &mut questions {
                        *q = q.clone().with_provenance(Provenance::Static);
                    }
                    Ok(questions)
                }
                Fake::Hang => {
                    std::future::pending::<()>().await;
                    Err(TierFailure::TimedOut)
                }
            }
        }
    }

    fn supplier(strategies: Vec<Arc<dyn QuestionStrategy>>) -> QuestionSupplier {
        QuestionSupplier::new(
            strategies,
            Arc::new(InMemoryRepository::new()),
            curriculum(),
            &GenerationConfig::default(),
        )
    }

    fn ids() -> (UserId, TopicId, LessonId) {
        (
            UserId::new("learner").unwrap(),
            TopicId::new("business_continuity").unwrap(),
            LessonId::new(1),
        )
    }

    #[tokio::test]
    async fn first_successful_tier_wins() {
        let (user, topic, lesson) = ids();
        let supplier = supplier(vec![Arc::new(Fake::Fail), Arc::new(Fake::Serve(5))]);
        let (questions, report) = supplier
            .generate_with_report(&user, &topic, lesson, 3)
            .await
            .unwrap();
        assert_eq!(questions.len(), 3);
        assert_eq!(report.served_by, "serve");
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(
            report.attempts[0].outcome,
            TierOutcome::Failed(TierFailure::NoEntries)
        );
        assert_eq!(report.difficulty, Difficulty::Intermediate);
    }

    #[tokio::test]
    async fn short_batch_falls_through() {
        let (user, topic, lesson) = ids();
        let supplier = supplier(vec![Arc::new(Fake::Serve(2))]);
        let (questions, report) = supplier
            .generate_with_report(&user, &topic, lesson, 3)
            .await
            .unwrap();
        assert_eq!(questions.len(), 3);
        assert!(report.exhausted());
        assert_eq!(
            report.attempts[0].outcome,
            TierOutcome::Failed(TierFailure::TooFew { got: 2, needed: 3 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_tier_times_out_and_chain_continues() {
        let (user, topic, lesson) = ids();
        let supplier = supplier(vec![Arc::new(Fake::Hang), Arc::new(Fake::Serve(3))]);
        let (questions, report) = supplier
            .generate_with_report(&user, &topic, lesson, 3)
            .await
            .unwrap();
        assert_eq!(questions.len(), 3);
        assert_eq!(report.served_by, "serve");
        assert_eq!(
            report.attempts[0].outcome,
            TierOutcome::Failed(TierFailure::TimedOut)
        );
        assert!(report.attempts[0].elapsed >= Duration::from_secs(15));
        assert!(report.attempts[0].elapsed < Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn overall_deadline_caps_the_chain() {
        let (user, topic, lesson) = ids();
        let supplier = supplier(vec![
            Arc::new(Fake::Hang),
            Arc::new(Fake::Hang),
            Arc::new(Fake::Serve(3)),
        ]);
        let started = Instant::now();
        let (questions, report) = supplier
            .generate_with_report(&user, &topic, lesson, 3)
            .await
            .unwrap();
        assert_eq!(questions.len(), 3);
        assert!(report.exhausted());
        assert!(report.attempts[1].elapsed <= Duration::from_secs(6));
        assert_eq!(
            report.attempts[2].outcome,
            TierOutcome::Failed(TierFailure::TimedOut)
        );
        let total = started.elapsed();
        assert!(total >= Duration::from_secs(20) && total < Duration::from_secs(21));
    }

    /// A store whose reads never complete.
    struct StalledProgress;

    #[async_trait]
    impl ProgressRepository for StalledProgress {
        async fn get_lesson(
            &self,
            _user: &UserId,
            _topic: &TopicId,
            _lesson: LessonId,
        ) -> Result<LessonProgress, StorageError> {
            std::future::pending().await
        }

        async fn list_lessons(&self, _user: &UserId) -> Result<Vec<LessonProgress>, StorageError> {
            std::future::pending().await
        }

        async fn get_aggregate(&self, _user: &UserId) -> Result<UserAggregate, StorageError> {
            std::future::pending().await
        }

        async fn statistics(&self) -> Result<ProgressStats, StorageError> {
            std::future::pending().await
        }

        async fn reset_user(&self, _user: &UserId) -> Result<ResetCounts, StorageError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_progress_store_stays_within_the_deadline() {
        let (user, topic, lesson) = ids();
        let config = GenerationConfig::default();
        let supplier = QuestionSupplier::new(
            vec![Arc::new(Fake::Serve(3))],
            Arc::new(StalledProgress),
            curriculum(),
            &config,
        );
        let started = Instant::now();
        let (questions, report) = supplier
            .generate_with_report(&user, &topic, lesson, 3)
            .await
            .unwrap();
        assert_eq!(questions.len(), 3);
        assert_eq!(report.served_by, "serve");
        assert_eq!(report.difficulty, Difficulty::Intermediate);
        assert!(started.elapsed() <= config.total_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_progress_store_with_hanging_tier_still_meets_the_deadline() {
        let (user, topic, lesson) = ids();
        let config = GenerationConfig::default();
        let supplier = QuestionSupplier::new(
            vec![Arc::new(Fake::Hang), Arc::new(Fake::Serve(3))],
            Arc::new(StalledProgress),
            curriculum(),
            &config,
        );
        let started = Instant::now();
        let questions = supplier.generate(&user, &topic, lesson, 3).await.unwrap();
        assert_eq!(questions.len(), 3);
        assert!(started.elapsed() <= config.total_timeout() + Duration::from_millis(1));
    }

    #[tokio::test]
    async fn count_outside_bounds_is_rejected() {
        let (user, topic, lesson) = ids();
        let supplier = supplier(Vec::new());
        for count in [0, MAX_QUESTIONS_PER_LESSON + 1] {
            assert_eq!(
                supplier.generate(&user, &topic, lesson, count).await,
                Err(SupplierError::InvalidCount {
                    got: count,
                    max: MAX_QUESTIONS_PER_LESSON
                })
            );
        }
    }

    #[tokio::test]
    async fn unknown_lesson_still_gets_questions() {
        let (user, _, _) = ids();
        let topic = TopicId::new("unknown").unwrap();
        let questions = supplier(Vec::new())
            .generate(&user, &topic, LessonId::new(4), 2)
            .await
            .unwrap();
        assert_eq!(questions.len(), 2);
        assert!(questions[0].text().contains("unknown"));
    }
}
