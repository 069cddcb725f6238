use std::sync::Arc;

use storage::repository::Storage;
use tracing::info;
use tutor_core::model::Curriculum;

use crate::Clock;
use crate::ai::{ChatCompletionsClient, InMemoryKnowledgeIndex, TextGenerator};
use crate::config::{EngineConfig, load_curriculum};
use crate::error::AppServicesError;
use crate::progress_service::ProgressService;
use crate::quiz::{QuizFlow, QuizSessionManager};
use crate::supplier::{QuestionStrategy, QuestionSupplier, StaticBank, standard_chain};

/// Assembles the app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    config: Arc<EngineConfig>,
    curriculum: Arc<Curriculum>,
    progress: Arc<ProgressService>,
    supplier: Arc<QuestionSupplier>,
    sessions: Arc<QuizSessionManager>,
    flow: Arc<QuizFlow>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage at `config.database_url`.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if content files cannot be loaded or storage
    /// initialization fails.
    pub async fn new_sqlite(config: EngineConfig, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(&config.database_url).await?;
        Self::with_storage(config, clock, storage)
    }

    /// Build services over `storage`, loading curriculum, bank and corpus
    /// from the configured paths.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Config` if a content file is invalid.
    pub fn with_storage(
        config: EngineConfig,
        clock: Clock,
        storage: Storage,
    ) -> Result<Self, AppServicesError> {
        let curriculum = load_curriculum(&config.paths.curriculum)?;
        let mut bank = StaticBank::load(&config.paths.question_bank)?;
        if config.generation.shuffle_static_bank {
            bank = bank.with_shuffle(config.generation.shuffle_seed);
        }
        let index = InMemoryKnowledgeIndex::load(&config.paths.knowledge_base)?;
        let generator: Arc<dyn TextGenerator> =
            Arc::new(ChatCompletionsClient::new(&config.ai.settings()?));
        info!(
            topics = curriculum.topics().len(),
            lessons = curriculum.total_lessons(),
            generation = generator.enabled(),
            "content loaded"
        );

        let strategies = standard_chain(
            Arc::new(index),
            generator,
            bank,
            config.generation.top_k,
        );
        Ok(Self::from_parts(config, clock, storage, curriculum, strategies))
    }

    /// Wire services from already-loaded parts.
    #[must_use]
    pub fn from_parts(
        config: EngineConfig,
        clock: Clock,
        storage: Storage,
        curriculum: Curriculum,
        strategies: Vec<Arc<dyn QuestionStrategy>>,
    ) -> Self {
        let curriculum = Arc::new(curriculum);
        let progress = Arc::new(ProgressService::new(
            Arc::clone(&storage.progress),
            Arc::clone(&curriculum),
        ));
        let supplier = Arc::new(QuestionSupplier::new(
            strategies,
            Arc::clone(&storage.progress),
            Arc::clone(&curriculum),
            &config.generation,
        ));
        let sessions = Arc::new(QuizSessionManager::new(
            clock,
            Arc::clone(&storage.sessions),
            Arc::clone(&storage.completions),
            Arc::clone(&curriculum),
            config.pass_threshold,
        ));
        let flow = Arc::new(QuizFlow::new(
            Arc::clone(&progress),
            Arc::clone(&supplier),
            Arc::clone(&sessions),
            config.questions_per_lesson,
        ));

        Self {
            config: Arc::new(config),
            curriculum,
            progress,
            supplier,
            sessions,
            flow,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn curriculum(&self) -> Arc<Curriculum> {
        Arc::clone(&self.curriculum)
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn supplier(&self) -> Arc<QuestionSupplier> {
        Arc::clone(&self.supplier)
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<QuizSessionManager> {
        Arc::clone(&self.sessions)
    }

    #[must_use]
    pub fn flow(&self) -> Arc<QuizFlow> {
        Arc::clone(&self.flow)
    }
}
