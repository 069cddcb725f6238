use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::difficulty::Difficulty;

/// Number of answer options every question carries.
pub const OPTION_COUNT: usize = 4;

pub const MAX_QUESTION_LEN: usize = 500;
pub const MAX_EXPLANATION_LEN: usize = 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question text cannot be empty")]
    EmptyText,

    #[error("question text too long ({len} > {MAX_QUESTION_LEN})")]
    TextTooLong { len: usize },

    #[error("expected {OPTION_COUNT} options, got {got}")]
    OptionCount { got: usize },

    #[error("option {index} is empty")]
    EmptyOption { index: usize },

    #[error("correct answer index {index} is out of range")]
    CorrectAnswerOutOfRange { index: i64 },

    #[error("explanation too long ({len} > {MAX_EXPLANATION_LEN})")]
    ExplanationTooLong { len: usize },
}

/// Where a question came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Produced by the generation backend from retrieved material.
    Generated,
    /// Taken (or adapted) from the curated question bank.
    Static,
    /// Synthesized because no data source was available.
    Placeholder,
}

/// Unvalidated question, as parsed from a generation response, the static
/// bank, or persisted session JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDraft {
    #[serde(alias = "question")]
    pub text: String,
    pub options: Vec<String>,
    pub correct_answer: i64,
    #[serde(default)]
    pub explanation: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: Difficulty,
    #[serde(default = "default_provenance")]
    pub provenance: Provenance,
}

fn default_difficulty() -> Difficulty {
    Difficulty::Intermediate
}

fn default_provenance() -> Provenance {
    Provenance::Static
}

impl QuestionDraft {
    /// Validate into a `Question`.
    ///
    /// Surrounding whitespace is trimmed from text, options and explanation.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the text is empty or too long, there are not
    /// exactly four non-empty options, the correct index is outside `0..4`, or
    /// the explanation is too long.
    pub fn validate(self) -> Result<Question, QuestionError> {
        let text = self.text.trim().to_owned();
        if text.is_empty() {
            return Err(QuestionError::EmptyText);
        }
        let len = text.chars().count();
        if len > MAX_QUESTION_LEN {
            return Err(QuestionError::TextTooLong { len });
        }

        if self.options.len() != OPTION_COUNT {
            return Err(QuestionError::OptionCount {
                got: self.options.len(),
            });
        }
        let mut options = [String::new(), String::new(), String::new(), String::new()];
        for (index, option) in self.options.into_iter().enumerate() {
            let option = option.trim().to_owned();
            if option.is_empty() {
                return Err(QuestionError::EmptyOption { index });
            }
            options[index] = option;
        }

        let correct_answer = usize::try_from(self.correct_answer)
            .ok()
            .filter(|idx| *idx < OPTION_COUNT)
            .ok_or(QuestionError::CorrectAnswerOutOfRange {
                index: self.correct_answer,
            })?;

        let explanation = self.explanation.trim().to_owned();
        let len = explanation.chars().count();
        if len > MAX_EXPLANATION_LEN {
            return Err(QuestionError::ExplanationTooLong { len });
        }

        Ok(Question {
            text,
            options,
            correct_answer,
            explanation,
            difficulty: self.difficulty,
            provenance: self.provenance,
        })
    }
}

/// A validated multiple-choice question with exactly four options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QuestionDraft", into = "QuestionDraft")]
pub struct Question {
    text: String,
    options: [String; OPTION_COUNT],
    correct_answer: usize,
    explanation: String,
    difficulty: Difficulty,
    provenance: Provenance,
}

impl Question {
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn options(&self) -> &[String; OPTION_COUNT] {
        &self.options
    }

    #[must_use]
    pub fn correct_answer(&self) -> usize {
        self.correct_answer
    }

    #[must_use]
    pub fn correct_option(&self) -> &str {
        &self.options[self.correct_answer]
    }

    #[must_use]
    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    #[must_use]
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    #[must_use]
    pub fn is_correct(&self, chosen: usize) -> bool {
        chosen == self.correct_answer
    }

    #[must_use]
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// Generic stand-in used when no question source is available. The
    /// titles are clipped so the result is valid for any input.
    #[must_use]
    pub fn placeholder(
        number: usize,
        topic_title: &str,
        lesson_title: &str,
        difficulty: Difficulty,
    ) -> Self {
        Self {
            text: format!("Question {number} on {}", clip(topic_title))
                .trim_end()
                .to_owned(),
            options: std::array::from_fn(|i| format!("Option {}", i + 1)),
            correct_answer: 0,
            explanation: format!("Review the lesson \"{}\".", clip(lesson_title)),
            difficulty,
            provenance: Provenance::Placeholder,
        }
    }

    /// Derive a review variant: prefixed text and options rotated by `shift`,
    /// with the correct index following its option. The content stays the
    /// curated one; only presentation changes.
    #[must_use]
    pub fn review_variant(&self, shift: usize) -> Self {
        let shift = shift % OPTION_COUNT;
        let mut options = self.options.clone();
        options.rotate_left(shift);
        let correct_answer = (self.correct_answer + OPTION_COUNT - shift) % OPTION_COUNT;
        Self {
            text: format!("Review: {}", self.text),
            options,
            correct_answer,
            explanation: self.explanation.clone(),
            difficulty: self.difficulty,
            provenance: self.provenance,
        }
    }
}

const PLACEHOLDER_TITLE_LEN: usize = 200;

fn clip(title: &str) -> String {
    title.trim().chars().take(PLACEHOLDER_TITLE_LEN).collect()
}

impl TryFrom<QuestionDraft> for Question {
    type Error = QuestionError;

    fn try_from(value: QuestionDraft) -> Result<Self, Self::Error> {
        value.validate()
    }
}

impl From<Question> for QuestionDraft {
    fn from(value: Question) -> Self {
        Self {
            text: value.text,
            options: value.options.into_iter().collect(),
            // Bounded by OPTION_COUNT, so the conversion cannot fail.
            correct_answer: i64::try_from(value.correct_answer).unwrap_or_default(),
            explanation: value.explanation,
            difficulty: value.difficulty,
            provenance: value.provenance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> QuestionDraft {
        QuestionDraft {
            text: "What does RTO stand for?".into(),
            options: vec![
                "Recovery Time Objective".into(),
                "Risk Transfer Operation".into(),
                "Rapid Technical Operation".into(),
                "Resource Time Optimization".into(),
            ],
            correct_answer: 0,
            explanation: "Target time to restore a process.".into(),
            difficulty: Difficulty::Intermediate,
            provenance: Provenance::Static,
        }
    }

    #[test]
    fn validates_well_formed_question() {
        let q = draft().validate().unwrap();
        assert_eq!(q.correct_option(), "Recovery Time Objective");
        assert!(q.is_correct(0));
        assert!(!q.is_correct(1));
    }

    #[test]
    fn rejects_wrong_option_count() {
        let mut d = draft();
        d.options.pop();
        assert_eq!(d.validate().unwrap_err(), QuestionError::OptionCount { got: 3 });
    }

    #[test]
    fn rejects_out_of_range_correct_answer() {
        let mut d = draft();
        d.correct_answer = 4;
        assert!(matches!(
            d.validate(),
            Err(QuestionError::CorrectAnswerOutOfRange { index: 4 })
        ));
        let mut d = draft();
        d.correct_answer = -1;
        assert!(d.validate().is_err());
    }

    #[test]
    fn rejects_blank_option() {
        let mut d = draft();
        d.options[2] = "  ".into();
        assert_eq!(d.validate().unwrap_err(), QuestionError::EmptyOption { index: 2 });
    }

    #[test]
    fn review_variant_keeps_correct_option() {
        let q = draft().validate().unwrap();
        for shift in 0..6 {
            let v = q.review_variant(shift);
            assert_eq!(v.correct_option(), q.correct_option());
            assert!(v.text().starts_with("Review: "));
        }
    }

    #[test]
    fn json_uses_question_alias_and_revalidates() {
        let json = r#"{"question":"Q?","options":["a","b","c","d"],"correct_answer":2,"explanation":"e"}"#;
        let q: Question = serde_json::from_str(json).unwrap();
        assert_eq!(q.correct_answer(), 2);
        assert_eq!(q.provenance(), Provenance::Static);

        let bad = r#"{"question":"Q?","options":["a","b"],"correct_answer":0}"#;
        assert!(serde_json::from_str::<Question>(bad).is_err());
    }

    #[test]
    fn placeholder_survives_revalidation_for_any_title() {
        let long = "x".repeat(5_000);
        for (topic, lesson) in [("", ""), ("  ", "\t"), (long.as_str(), long.as_str())] {
            let q = Question::placeholder(10, topic, lesson, Difficulty::Beginner);
            assert_eq!(q.provenance(), Provenance::Placeholder);
            assert_eq!(q.correct_option(), "Option 1");
            let again = QuestionDraft::from(q.clone()).validate().unwrap();
            assert_eq!(again, q);
        }
    }
}
