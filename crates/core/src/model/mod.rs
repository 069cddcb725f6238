pub mod curriculum;
mod difficulty;
mod ids;
mod progress;
pub mod question;
pub mod quiz_session;
mod settings;
mod status;

pub use curriculum::{Curriculum, CurriculumDraft, CurriculumError, Lesson, Position, Topic};
pub use difficulty::Difficulty;
pub use ids::{IdError, LessonId, SessionId, TopicId, UserId};
pub use progress::{AttemptEffect, LessonProgress, ProgressError};
pub use question::{Provenance, Question, QuestionDraft, QuestionError};
pub use quiz_session::{Answer, QuizSession, QuizSessionError, score_percent};
pub use settings::{ChatBackendSettings, ChatBackendSettingsDraft, SettingsError};
pub use status::{LessonStatus, PerformanceLevel, TopicStatus};
