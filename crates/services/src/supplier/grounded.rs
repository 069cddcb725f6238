use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use tutor_core::model::Question;
use tutor_core::model::question::OPTION_COUNT;

use super::parse::parse_questions;
use super::{QuestionStrategy, SupplyRequest, TierFailure};
use crate::ai::{KnowledgeIndex, KnowledgeQuery, Snippet, TextGenerator};

const SYSTEM_PROMPT: &str = "You are an expert tutor writing multiple-choice assessment \
questions. Answer with a JSON array only, without any surrounding text.";

/// What each stage of grounded generation produced.
///
/// Stages fill it in order; a later stage only reads fields set by earlier
/// ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationTrace {
    pub query: Option<KnowledgeQuery>,
    pub snippets: Vec<Snippet>,
    pub prompt: Option<String>,
    pub response: Option<String>,
    pub questions: Vec<Question>,
    pub rejected: usize,
}

/// Retrieval-grounded generation through a text-generation backend.
pub struct GroundedGeneration {
    index: Arc<dyn KnowledgeIndex>,
    generator: Arc<dyn TextGenerator>,
    top_k: usize,
}

impl GroundedGeneration {
    #[must_use]
    pub fn new(
        index: Arc<dyn KnowledgeIndex>,
        generator: Arc<dyn TextGenerator>,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            generator,
            top_k,
        }
    }

    /// Run every stage and return the full trace.
    ///
    /// # Errors
    ///
    /// Returns the `TierFailure` of the first stage that failed.
    pub async fn run(&self, request: &SupplyRequest) -> Result<GenerationTrace, TierFailure> {
        if !self.generator.enabled() {
            return Err(TierFailure::Disabled);
        }

        let trace = GenerationTrace {
            query: Some(knowledge_query(request, self.top_k)),
            ..GenerationTrace::default()
        };
        let trace = self.retrieve(trace).await?;
        let trace = build_prompt(trace, request);
        let trace = self.complete(trace).await?;
        let trace = parse(trace, request)?;
        debug!(
            snippets = trace.snippets.len(),
            parsed = trace.questions.len(),
            rejected = trace.rejected,
            "grounded generation succeeded"
        );
        Ok(trace)
    }

    async fn retrieve(&self, mut trace: GenerationTrace) -> Result<GenerationTrace, TierFailure> {
        let Some(query) = trace.query.as_ref() else {
            return Err(TierFailure::NoMaterial);
        };
        let snippets = self
            .index
            .search(query)
            .await
            .map_err(|e| TierFailure::Backend(e.to_string()))?;
        if snippets.is_empty() {
            return Err(TierFailure::NoMaterial);
        }
        trace.snippets = snippets;
        Ok(trace)
    }

    async fn complete(&self, mut trace: GenerationTrace) -> Result<GenerationTrace, TierFailure> {
        let Some(prompt) = trace.prompt.as_deref() else {
            return Err(TierFailure::NoMaterial);
        };
        let response = self
            .generator
            .complete(SYSTEM_PROMPT, prompt)
            .await
            .map_err(|e| TierFailure::Backend(e.to_string()))?;
        trace.response = Some(response);
        Ok(trace)
    }
}

fn knowledge_query(request: &SupplyRequest, top_k: usize) -> KnowledgeQuery {
    let mut text = format!("{} {}", request.topic_title, request.lesson_title);
    for keyword in &request.keywords {
        text.push(' ');
        text.push_str(keyword);
    }
    KnowledgeQuery {
        text,
        topic: Some(request.topic_id.clone()),
        top_k,
    }
}

fn build_prompt(mut trace: GenerationTrace, request: &SupplyRequest) -> GenerationTrace {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Write exactly {} multiple-choice questions.",
        request.count
    );
    let _ = writeln!(prompt, "Topic: {}", request.topic_title);
    let _ = writeln!(prompt, "Lesson: {}", request.lesson_title);
    let _ = writeln!(prompt, "Difficulty: {}", request.difficulty);
    prompt.push_str("\nReference material:\n");
    for snippet in &trace.snippets {
        let _ = writeln!(prompt, "Q: {}\nA: {}\n", snippet.prompt, snippet.response);
    }
    let _ = writeln!(
        prompt,
        "Requirements:\n\
         - every question has exactly {OPTION_COUNT} options\n\
         - exactly one option is correct\n\
         - a short explanation of the correct answer\n\
         - use only facts from the reference material\n"
    );
    prompt.push_str(
        "Format:\n\
         [\n  {\"question\": \"...\", \"options\": [\"...\", \"...\", \"...\", \"...\"], \
         \"correct_answer\": 0, \"explanation\": \"...\"}\n]\n",
    );
    trace.prompt = Some(prompt);
    trace
}

fn parse(mut trace: GenerationTrace, request: &SupplyRequest) -> Result<GenerationTrace, TierFailure> {
    let raw = trace.response.as_deref().unwrap_or_default();
    let batch = parse_questions(raw, request.difficulty)
        .map_err(|e| TierFailure::Malformed(e.0))?;
    if batch.questions.len() < request.count {
        return Err(TierFailure::TooFew {
            got: batch.questions.len(),
            needed: request.count,
        });
    }
    trace.questions = batch.questions;
    trace.questions.truncate(request.count);
    trace.rejected = batch.rejected;
    Ok(trace)
}

#[async_trait]
impl QuestionStrategy for GroundedGeneration {
    fn name(&self) -> &'static str {
        "grounded_generation"
    }

    async fn supply(&self, request: &SupplyRequest) -> Result<Vec<Question>, TierFailure> {
        self.run(request).await.map(|trace| trace.questions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::InMemoryKnowledgeIndex;
    use crate::error::ChatClientError;
    use crate::supplier::tests::request;
    use std::sync::Mutex;
    use tutor_core::model::Provenance;

    /// Returns a canned response and records the prompt it was given.
    struct Canned {
        response: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl Canned {
        fn ok(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(response.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                response: Err(()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Canned {
        fn enabled(&self) -> bool {
            true
        }

        async fn complete(&self, _system: &str, prompt: &str) -> Result<String, ChatClientError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.response.clone().map_err(|()| ChatClientError::EmptyResponse)
        }
    }

    fn items(n: usize) -> String {
        let item = r#"{"question":"What does RTO mean?","options":["a","b","c","d"],"correct_answer":0,"explanation":"a"}"#;
        format!("[{}]", vec![item; n].join(","))
    }

    fn tier(generator: Arc<dyn TextGenerator>) -> GroundedGeneration {
        GroundedGeneration::new(Arc::new(InMemoryKnowledgeIndex::builtin()), generator, 5)
    }

    #[tokio::test]
    async fn trace_records_every_stage() {
        let generator = Canned::ok(&items(4));
        let trace = tier(generator.clone()).run(&request(3)).await.unwrap();

        assert!(!trace.snippets.is_empty());
        let prompt = trace.prompt.as_deref().unwrap();
        assert!(prompt.contains("Write exactly 3"));
        assert!(prompt.contains("Recovery Time Objective"));
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
        assert_eq!(trace.questions.len(), 3);
        assert!(
            trace
                .questions
                .iter()
                .all(|q| q.provenance() == Provenance::Generated)
        );
    }

    #[tokio::test]
    async fn too_few_valid_items_fail_the_tier() {
        let result = tier(Canned::ok(&items(2))).run(&request(3)).await;
        assert_eq!(result.unwrap_err(), TierFailure::TooFew { got: 2, needed: 3 });
    }

    #[tokio::test]
    async fn malformed_and_failing_backends_fail_the_tier() {
        let result = tier(Canned::ok("no questions today")).run(&request(3)).await;
        assert!(matches!(result, Err(TierFailure::Malformed(_))));

        let result = tier(Canned::failing()).run(&request(3)).await;
        assert!(matches!(result, Err(TierFailure::Backend(_))));
    }

    #[tokio::test]
    async fn empty_retrieval_skips_the_backend() {
        let generator = Canned::ok(&items(3));
        let tier = GroundedGeneration::new(
            Arc::new(InMemoryKnowledgeIndex::default()),
            generator.clone(),
            5,
        );
        assert_eq!(
            tier.run(&request(3)).await.unwrap_err(),
            TierFailure::NoMaterial
        );
        assert!(generator.prompts.lock().unwrap().is_empty());
    }
}
