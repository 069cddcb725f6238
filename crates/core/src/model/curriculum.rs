use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{LessonId, TopicId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CurriculumError {
    #[error("curriculum has no topics")]
    NoTopics,

    #[error("topic {0} has no lessons")]
    EmptyTopic(TopicId),

    #[error("duplicate topic id: {0}")]
    DuplicateTopic(TopicId),

    #[error("duplicate lesson {lesson} in topic {topic}")]
    DuplicateLesson { topic: TopicId, lesson: LessonId },

    #[error("title cannot be empty")]
    EmptyTitle,
}

//
// ─── LESSONS & TOPICS ──────────────────────────────────────────────────────────
//

/// Smallest curriculum unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub title: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Named unit of curriculum holding an ordered list of lessons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub title: String,
    pub lessons: Vec<Lesson>,
}

impl Topic {
    #[must_use]
    pub fn lesson(&self, id: LessonId) -> Option<&Lesson> {
        self.lessons.iter().find(|lesson| lesson.id == id)
    }

    /// Position of the lesson inside this topic, zero-based.
    #[must_use]
    pub fn lesson_index(&self, id: LessonId) -> Option<usize> {
        self.lessons.iter().position(|lesson| lesson.id == id)
    }
}

/// A `(topic, lesson)` pair in curriculum order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub topic_id: TopicId,
    pub lesson_id: LessonId,
}

impl Position {
    #[must_use]
    pub fn new(topic_id: TopicId, lesson_id: LessonId) -> Self {
        Self {
            topic_id,
            lesson_id,
        }
    }
}

/// Raw curriculum as read from configuration, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CurriculumDraft {
    #[serde(default)]
    pub topics: Vec<Topic>,
}

impl CurriculumDraft {
    /// Validate the draft and freeze it into a `Curriculum`.
    ///
    /// # Errors
    ///
    /// Returns `CurriculumError` if there are no topics, a topic has no lessons,
    /// ids repeat, or a title is blank.
    pub fn validate(self) -> Result<Curriculum, CurriculumError> {
        if self.topics.is_empty() {
            return Err(CurriculumError::NoTopics);
        }

        let mut seen_topics = HashSet::new();
        for topic in &self.topics {
            if topic.title.trim().is_empty() {
                return Err(CurriculumError::EmptyTitle);
            }
            if !seen_topics.insert(topic.id.clone()) {
                return Err(CurriculumError::DuplicateTopic(topic.id.clone()));
            }
            if topic.lessons.is_empty() {
                return Err(CurriculumError::EmptyTopic(topic.id.clone()));
            }

            let mut seen_lessons = HashSet::new();
            for lesson in &topic.lessons {
                if lesson.title.trim().is_empty() {
                    return Err(CurriculumError::EmptyTitle);
                }
                if !seen_lessons.insert(lesson.id) {
                    return Err(CurriculumError::DuplicateLesson {
                        topic: topic.id.clone(),
                        lesson: lesson.id,
                    });
                }
            }
        }

        Ok(Curriculum {
            topics: self.topics,
        })
    }
}

//
// ─── CURRICULUM ────────────────────────────────────────────────────────────────
//

/// Fixed, externally supplied total order over `(topic, lesson)` pairs.
///
/// Topic order is the order of `topics`; lesson order is the order of each
/// topic's `lessons`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Curriculum {
    topics: Vec<Topic>,
}

impl Curriculum {
    #[must_use]
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    #[must_use]
    pub fn topic(&self, id: &TopicId) -> Option<&Topic> {
        self.topics.iter().find(|topic| &topic.id == id)
    }

    #[must_use]
    pub fn lesson(&self, topic: &TopicId, lesson: LessonId) -> Option<&Lesson> {
        self.topic(topic).and_then(|t| t.lesson(lesson))
    }

    #[must_use]
    pub fn contains(&self, topic: &TopicId, lesson: LessonId) -> bool {
        self.lesson(topic, lesson).is_some()
    }

    #[must_use]
    pub fn total_lessons(&self) -> usize {
        self.topics.iter().map(|topic| topic.lessons.len()).sum()
    }

    /// Every position in curriculum order.
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.topics.iter().flat_map(|topic| {
            topic
                .lessons
                .iter()
                .map(move |lesson| Position::new(topic.id.clone(), lesson.id))
        })
    }

    #[must_use]
    pub fn first_position(&self) -> Position {
        // Validation guarantees at least one topic with one lesson.
        let topic = &self.topics[0];
        Position::new(topic.id.clone(), topic.lessons[0].id)
    }

    #[must_use]
    pub fn last_position(&self) -> Position {
        let topic = &self.topics[self.topics.len() - 1];
        Position::new(topic.id.clone(), topic.lessons[topic.lessons.len() - 1].id)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    fn lesson(id: u32, title: &str) -> Lesson {
        Lesson {
            id: LessonId::new(id),
            title: title.to_owned(),
            keywords: vec![title.to_lowercase()],
        }
    }

    /// Two topics: `basics` with three lessons and `assessment` with two.
    pub(crate) fn sample_curriculum() -> Curriculum {
        CurriculumDraft {
            topics: vec![
                Topic {
                    id: TopicId::new("basics").unwrap(),
                    title: "Basics".into(),
                    lessons: vec![
                        lesson(1, "Definitions"),
                        lesson(2, "Sources"),
                        lesson(3, "Incidents"),
                    ],
                },
                Topic {
                    id: TopicId::new("assessment").unwrap(),
                    title: "Assessment".into(),
                    lessons: vec![lesson(1, "Threats"), lesson(2, "Scoring")],
                },
            ],
        }
        .validate()
        .unwrap()
    }
}
