use thiserror::Error;

use crate::model::{
    CurriculumError, IdError, ProgressError, QuestionError, QuizSessionError, SettingsError,
};

/// Any domain validation failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Id(#[from] IdError),
    #[error(transparent)]
    Curriculum(#[from] CurriculumError),
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    QuizSession(#[from] QuizSessionError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LessonId, QuestionDraft, TopicId};

    fn topic_and_question(raw: &str) -> Result<(TopicId, LessonId), Error> {
        let topic = TopicId::new(raw)?;
        QuestionDraft {
            text: "Which?".into(),
            options: vec!["a".into(), "b".into()],
            correct_answer: 0,
            explanation: String::new(),
            difficulty: crate::model::Difficulty::Beginner,
            provenance: crate::model::Provenance::Static,
        }
        .validate()?;
        Ok((topic, LessonId::new(1)))
    }

    #[test]
    fn domain_failures_convert_into_error() {
        assert!(matches!(topic_and_question(""), Err(Error::Id(_))));
        assert!(matches!(
            topic_and_question("risk_basics"),
            Err(Error::Question(_))
        ));
    }
}
