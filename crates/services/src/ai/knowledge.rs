use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};
use tutor_core::model::{LessonId, TopicId};

use crate::error::{ConfigError, KnowledgeError};

/// One question/answer pair of source material.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KnowledgeEntry {
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub metadata: KnowledgeMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KnowledgeMetadata {
    pub topic: Option<TopicId>,
    pub lesson: Option<LessonId>,
    pub difficulty: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeQuery {
    pub text: String,
    /// Only entries of this topic are considered when set.
    pub topic: Option<TopicId>,
    pub top_k: usize,
}

/// A retrieved entry with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    pub prompt: String,
    pub response: String,
    pub relevance: f64,
}

/// Similarity search over a knowledge corpus.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// Up to `top_k` entries with positive relevance, best first.
    ///
    /// # Errors
    ///
    /// Returns `KnowledgeError` if the index cannot be queried.
    async fn search(&self, query: &KnowledgeQuery) -> Result<Vec<Snippet>, KnowledgeError>;
}

//
// ─── TERM VECTORS ──────────────────────────────────────────────────────────────
//

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "what", "which", "with", "that", "this", "from", "how", "why",
    "its", "into", "can", "does", "not", "you", "your", "has", "have", "was", "were", "their",
];

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

#[derive(Debug, Clone, Default)]
struct TermVector {
    weights: HashMap<String, f64>,
    norm: f64,
}

impl TermVector {
    fn from_text(text: &str) -> Self {
        let mut weights: HashMap<String, f64> = HashMap::new();
        for token in tokenize(text) {
            *weights.entry(token).or_default() += 1.0;
        }
        let norm = weights.values().map(|w| w * w).sum::<f64>().sqrt();
        Self { weights, norm }
    }

    fn cosine(&self, other: &TermVector) -> f64 {
        if self.norm == 0.0 || other.norm == 0.0 {
            return 0.0;
        }
        let (small, large) = if self.weights.len() <= other.weights.len() {
            (self, other)
        } else {
            (other, self)
        };
        let dot: f64 = small
            .weights
            .iter()
            .filter_map(|(term, w)| large.weights.get(term).map(|v| w * v))
            .sum();
        dot / (self.norm * other.norm)
    }
}

//
// ─── IN-MEMORY INDEX ───────────────────────────────────────────────────────────
//

/// Term-frequency cosine index held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledgeIndex {
    entries: Vec<(KnowledgeEntry, TermVector)>,
}

impl InMemoryKnowledgeIndex {
    #[must_use]
    pub fn new(entries: Vec<KnowledgeEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| {
                let text = format!(
                    "{} {} {}",
                    entry.prompt,
                    entry.response,
                    entry.metadata.keywords.join(" ")
                );
                let vector = TermVector::from_text(&text);
                (entry, vector)
            })
            .collect();
        Self { entries }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse JSON Lines; blank lines are ignored and malformed lines are
    /// skipped with a warning.
    #[must_use]
    pub fn from_jsonl(content: &str) -> Self {
        let mut entries = Vec::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<KnowledgeEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(line = number + 1, error = %err, "skipping knowledge entry"),
            }
        }
        Self::new(entries)
    }

    /// Load a JSON Lines corpus, or the built-in corpus when the file does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file exists but cannot be read.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let index = Self::from_jsonl(&content);
                info!(path = %path.display(), entries = index.len(), "knowledge corpus loaded");
                Ok(index)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "knowledge corpus missing, using built-in entries");
                Ok(Self::builtin())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Small corpus covering the bundled curriculum.
    #[must_use]
    pub fn builtin() -> Self {
        let entry = |topic: &str, lesson: u32, prompt: &str, response: &str| KnowledgeEntry {
            prompt: prompt.to_string(),
            response: response.to_string(),
            metadata: KnowledgeMetadata {
                topic: TopicId::new(topic).ok(),
                lesson: Some(LessonId::new(lesson)),
                difficulty: None,
                keywords: Vec::new(),
            },
        };
        Self::new(vec![
            entry(
                "risk_basics",
                1,
                "What is risk?",
                "Risk is the effect of uncertainty on objectives, usually expressed as a \
                 combination of the likelihood of an event and its consequences.",
            ),
            entry(
                "risk_basics",
                2,
                "What are common sources of operational risk?",
                "People, processes, systems and external events are the usual sources of \
                 operational risk.",
            ),
            entry(
                "risk_basics",
                3,
                "What is a risk appetite?",
                "Risk appetite is the amount and type of risk an organization is willing to \
                 pursue or retain in pursuit of its objectives.",
            ),
            entry(
                "risk_assessment",
                1,
                "How is risk level usually calculated?",
                "Risk level is commonly estimated as likelihood multiplied by impact, each \
                 rated on an agreed scale.",
            ),
            entry(
                "risk_assessment",
                2,
                "What is a risk register?",
                "A risk register records identified risks with owners, ratings, treatments \
                 and review dates.",
            ),
            entry(
                "business_continuity",
                1,
                "What does RTO mean?",
                "Recovery Time Objective is the target time within which a process must be \
                 restored after a disruption.",
            ),
            entry(
                "business_continuity",
                2,
                "What does RPO mean?",
                "Recovery Point Objective is the maximum tolerable period of data loss, \
                 measured back from the disruption.",
            ),
        ])
    }

    fn rank(&self, query: &KnowledgeQuery) -> Vec<Snippet> {
        let query_vector = TermVector::from_text(&query.text);
        let mut ranked: Vec<Snippet> = self
            .entries
            .iter()
            .filter(|(entry, _)| match &query.topic {
                Some(topic) => entry.metadata.topic.as_ref() == Some(topic),
                None => true,
            })
            .filter_map(|(entry, vector)| {
                let relevance = vector.cosine(&query_vector);
                (relevance > 0.0).then(|| Snippet {
                    prompt: entry.prompt.clone(),
                    response: entry.response.clone(),
                    relevance,
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(query.top_k);
        ranked
    }
}

#[async_trait]
impl KnowledgeIndex for InMemoryKnowledgeIndex {
    async fn search(&self, query: &KnowledgeQuery) -> Result<Vec<Snippet>, KnowledgeError> {
        Ok(self.rank(query))
    }
}
