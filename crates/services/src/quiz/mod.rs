mod flow;
mod manager;

pub use flow::{FinishedQuiz, QuizFlow, StartedQuiz};
pub use manager::{AnswerFeedback, CompletionResult, QuizSessionManager};
