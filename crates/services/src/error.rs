//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;
use tutor_core::model::{
    CurriculumError, LessonId, QuestionError, QuizSessionError, SessionId, SettingsError, TopicId,
};

/// Errors emitted by `ChatCompletionsClient`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChatClientError {
    #[error("generation backend is not configured")]
    Disabled,
    #[error("generation backend returned an empty response")]
    EmptyResponse,
    #[error("generation request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors emitted by a `KnowledgeIndex`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KnowledgeError {
    #[error("knowledge index unavailable: {0}")]
    Unavailable(String),
}

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressServiceError {
    #[error("unknown lesson {topic}/{lesson}")]
    UnknownLesson { topic: TopicId, lesson: LessonId },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProgressServiceError {
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, ProgressServiceError::Storage(_))
    }
}

/// Errors emitted by `QuizSessionManager`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// Malformed input such as an out-of-range answer index.
    #[error("invalid input: {0}")]
    Validation(#[from] QuizSessionError),
    #[error("no active session")]
    NotFound,
    /// The session was superseded, completed, or moved on concurrently.
    #[error("session {0} is no longer the active session")]
    StaleSession(SessionId),
    #[error("another session was created concurrently")]
    SessionConflict,
    #[error("session has unanswered questions ({answered}/{total})")]
    NotExhausted { answered: usize, total: usize },
    #[error("storage unavailable: {0}")]
    Persistence(StorageError),
}

impl SessionError {
    /// The caller should re-fetch the active session and try again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::StaleSession(_) | SessionError::SessionConflict
        )
    }

    /// The store failed; nothing about the session itself is wrong.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, SessionError::Persistence(_))
    }
}

/// The only failure `QuestionSupplier::generate` reports.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SupplierError {
    #[error("question count must be within 1..={max}, got {got}")]
    InvalidCount { got: usize, max: usize },
}

/// Errors emitted by `QuizFlow`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuizFlowError {
    #[error("lesson {topic}/{lesson} is locked")]
    LessonLocked { topic: TopicId, lesson: LessonId },
    #[error("unknown lesson {topic}/{lesson}")]
    UnknownLesson { topic: TopicId, lesson: LessonId },
    #[error(transparent)]
    Progress(#[from] ProgressServiceError),
    #[error(transparent)]
    Supplier(#[from] SupplierError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl QuizFlowError {
    #[must_use]
    pub fn is_storage(&self) -> bool {
        match self {
            QuizFlowError::Progress(e) => e.is_storage(),
            QuizFlowError::Session(e) => e.is_storage(),
            _ => false,
        }
    }
}

/// Errors raised while loading configuration and content files.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error(transparent)]
    Curriculum(#[from] CurriculumError),
    #[error("invalid question in bank at {location}: {source}")]
    Question {
        location: String,
        source: QuestionError,
    },
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AppServicesError {
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, AppServicesError::Sqlite(_) | AppServicesError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outage() -> StorageError {
        StorageError::Connection("database is locked".into())
    }

    #[test]
    fn storage_failures_are_classified_through_wrappers() {
        assert!(ProgressServiceError::Storage(outage()).is_storage());
        assert!(SessionError::Persistence(outage()).is_storage());
        assert!(QuizFlowError::from(ProgressServiceError::Storage(outage())).is_storage());
        assert!(QuizFlowError::from(SessionError::Persistence(outage())).is_storage());
        assert!(AppServicesError::Storage(outage()).is_storage());

        assert!(!SessionError::SessionConflict.is_storage());
        assert!(!QuizFlowError::from(SessionError::NotFound).is_storage());
        assert!(
            !QuizFlowError::from(SupplierError::InvalidCount { got: 0, max: 10 }).is_storage()
        );
    }
}
