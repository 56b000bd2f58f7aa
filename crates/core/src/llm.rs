use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const CHAT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Chat-completion boundary. Implementations may fail on network, auth, or
/// rate limits; callers decide whether that is fatal or a fallback trigger.
#[async_trait]
pub trait ChatCompleter {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, ProviderError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_tokens: Option<u32>,
}

impl OpenAiChatClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(CHAT_REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            max_tokens: None,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatCompleter for OpenAiChatClient {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, ProviderError> {
        let payload = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature,
            max_tokens: self.max_tokens,
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Response {
                provider: "llm".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Response {
                provider: "llm".to_string(),
                details: "completion carried no content".to_string(),
            })
    }
}
