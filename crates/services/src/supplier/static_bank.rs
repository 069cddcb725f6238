use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::info;
use tutor_core::model::{LessonId, Provenance, Question, QuestionDraft, TopicId};

use super::{QuestionStrategy, SupplyRequest, TierFailure};
use crate::error::ConfigError;

type RawBank = BTreeMap<String, BTreeMap<String, Vec<QuestionDraft>>>;

/// Curated questions keyed by topic and lesson.
#[derive(Debug, Clone, Default)]
pub struct StaticBank {
    entries: HashMap<TopicId, BTreeMap<LessonId, Vec<Question>>>,
    shuffle_seed: Option<u64>,
}

impl StaticBank {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse `{ "<topic>": { "<lesson>": [question, ...] } }`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed JSON or keys and
    /// `ConfigError::Question` for an entry that fails validation.
    pub fn from_json(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let parse_err = |message: String| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        };
        let raw: RawBank = serde_json::from_str(content).map_err(|e| parse_err(e.to_string()))?;

        let mut entries: HashMap<TopicId, BTreeMap<LessonId, Vec<Question>>> = HashMap::new();
        for (topic_key, lessons) in raw {
            let topic: TopicId = topic_key.parse().map_err(|e| parse_err(format!("{e}")))?;
            for (lesson_key, drafts) in lessons {
                let lesson: LessonId =
                    lesson_key.parse().map_err(|e| parse_err(format!("{e}")))?;
                let mut questions = Vec::with_capacity(drafts.len());
                for (index, draft) in drafts.into_iter().enumerate() {
                    let question = draft.validate().map_err(|source| ConfigError::Question {
                        location: format!("{topic}/{lesson}[{index}]"),
                        source,
                    })?;
                    questions.push(question.with_provenance(Provenance::Static));
                }
                entries
                    .entry(topic.clone())
                    .or_default()
                    .insert(lesson, questions);
            }
        }
        Ok(Self {
            entries,
            shuffle_seed: None,
        })
    }

    /// Load the bank file; a missing file yields an empty bank.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let bank = Self::from_json(&content, path)?;
                info!(path = %path.display(), questions = bank.len(), "question bank loaded");
                Ok(bank)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "question bank missing, static tier disabled");
                Ok(Self::empty())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Shuffle candidates with a fixed seed whenever the bank holds more
    /// than requested.
    #[must_use]
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Total number of curated questions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn lesson(&self, topic: &TopicId, lesson: LessonId) -> &[Question] {
        self.entries
            .get(topic)
            .and_then(|lessons| lessons.get(&lesson))
            .map_or(&[], Vec::as_slice)
    }

    /// The lesson's questions, or the whole topic's when the lesson has none.
    fn candidates(&self, topic: &TopicId, lesson: LessonId) -> Vec<Question> {
        let own = self.lesson(topic, lesson);
        if !own.is_empty() {
            return own.to_vec();
        }
        self.entries
            .get(topic)
            .map(|lessons| lessons.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Exactly `count` questions, padded with review variants of the curated
    /// entries when the bank holds fewer.
    fn select(&self, topic: &TopicId, lesson: LessonId, count: usize) -> Option<Vec<Question>> {
        let mut candidates = self.candidates(topic, lesson);
        if candidates.is_empty() {
            return None;
        }
        if let Some(seed) = self.shuffle_seed {
            if candidates.len() > count {
                let mut rng = StdRng::seed_from_u64(seed);
                candidates.shuffle(&mut rng);
            }
        }

        let available = candidates.len();
        let mut selected: Vec<Question> = candidates.iter().take(count).cloned().collect();
        let mut i = 0;
        while selected.len() < count {
            let base = &candidates[i % available];
            selected.push(base.review_variant(i / available + 1));
            i += 1;
        }
        Some(selected)
    }
}

#[async_trait]
impl QuestionStrategy for StaticBank {
    fn name(&self) -> &'static str {
        "static_bank"
    }

    async fn supply(&self, request: &SupplyRequest) -> Result<Vec<Question>, TierFailure> {
        self.select(&request.topic_id, request.lesson_id, request.count)
            .ok_or(TierFailure::NoEntries)
    }
}
