#![forbid(unsafe_code)]

pub mod ai;
pub mod app_services;
pub mod config;
pub mod error;
pub mod progress_service;
pub mod quiz;
pub mod supplier;

pub use tutor_core::Clock;

pub use app_services::AppServices;
pub use config::EngineConfig;
pub use error::{
    AppServicesError, ConfigError, ProgressServiceError, QuizFlowError, SessionError,
    SupplierError,
};
pub use progress_service::{GlobalStats, LessonView, ProgressService, ProgressSummary};
pub use quiz::{AnswerFeedback, CompletionResult, FinishedQuiz, QuizFlow, QuizSessionManager, StartedQuiz};
pub use supplier::{QuestionStrategy, QuestionSupplier, SupplyReport, TierOutcome};
