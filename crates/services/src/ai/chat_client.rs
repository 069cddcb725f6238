use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tutor_core::model::ChatBackendSettings;

use crate::error::ChatClientError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// A request/response text-generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Whether the backend can be called at all.
    fn enabled(&self) -> bool;

    /// Complete a prompt.
    ///
    /// # Errors
    ///
    /// Returns `ChatClientError` when the backend is disabled, the request
    /// fails, or the response is empty.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ChatClientError>;
}

#[derive(Clone, Debug)]
struct ChatEndpoint {
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct ChatCompletionsClient {
    client: Client,
    endpoint: Option<ChatEndpoint>,
}

impl ChatCompletionsClient {
    /// Build a client; it stays disabled unless a base URL or key is set.
    #[must_use]
    pub fn new(settings: &ChatBackendSettings) -> Self {
        let endpoint = settings.is_configured().then(|| ChatEndpoint {
            base_url: settings
                .base_url()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: settings.api_key().map(str::to_owned),
            model: settings.model().unwrap_or(DEFAULT_MODEL).to_string(),
            temperature: settings.temperature(),
        });
        Self {
            client: Client::new(),
            endpoint,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(&ChatBackendSettings::default())
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsClient {
    fn enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ChatClientError> {
        let endpoint = self.endpoint.as_ref().ok_or(ChatClientError::Disabled)?;

        let url = format!("{}/chat/completions", endpoint.base_url);
        let payload = ChatRequest {
            model: endpoint.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt.to_string(),
                },
            ],
            temperature: endpoint.temperature,
        };

        let mut request = self.client.post(url).json(&payload);
        if let Some(key) = &endpoint.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(ChatClientError::HttpStatus(response.status()));
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ChatClientError::EmptyResponse)?;

        Ok(content.trim().to_string())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}
