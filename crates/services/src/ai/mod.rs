mod chat_client;
mod knowledge;

pub use chat_client::{ChatCompletionsClient, TextGenerator};
pub use knowledge::{
    InMemoryKnowledgeIndex, KnowledgeEntry, KnowledgeIndex, KnowledgeMetadata, KnowledgeQuery,
    Snippet,
};
