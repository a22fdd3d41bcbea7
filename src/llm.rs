//! # LLM client
//!
//! A single-turn text completion against an OpenAI-compatible API (OpenRouter by
//! default). Every agent in [`crate::agents`] talks to the model through the
//! [`Completion`] trait; [`LlmClient`] is the production implementation.
//!
//! Model, temperature and token limit are fixed when the client is constructed from
//! [`CompletionSettings`] and never change afterwards.
//!
//! # Example
//!
//! ```no_run
//! use law_rag::config::LawRagConfig;
//! use law_rag::llm::{Completion, LlmClient};
//!
//! # async fn run() -> Result<(), law_rag::llm::LlmError> {
//! let config = LawRagConfig::with_api_key("sk-...");
//! let client = LlmClient::new(&config);
//! let answer = client.complete("你好").await?;
//! println!("{answer}");
//! # Ok(()) }
//! ```

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
};
use std::future::Future;
use thiserror::Error;
use tracing::debug;

use crate::config::LawRagConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    Api(#[from] OpenAIError),

    #[error("completion response contained no text")]
    EmptyResponse,
}

/// Model parameters shared by every request a client sends.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// An opaque text-completion service.
pub trait Completion: Send + Sync {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String, LlmError>> + Send;
}

pub struct LlmClient {
    client: Client<OpenAIConfig>,
    settings: CompletionSettings,
}

impl LlmClient {
    pub fn new(config: &LawRagConfig) -> Self {
        Self::with_settings(
            &config.api_base,
            &config.api_key,
            config.completion_settings(),
        )
    }

    pub fn with_settings(api_base: &str, api_key: &str, settings: CompletionSettings) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);
        debug!("Client created for {api_base} with {settings:?}");
        Self {
            client: Client::with_config(openai_config),
            settings,
        }
    }

    pub fn settings(&self) -> &CompletionSettings {
        &self.settings
    }
}

impl Completion for LlmClient {
    #[allow(deprecated)]
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let message = ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
            name: None,
        });

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.settings.model.clone())
            .temperature(self.settings.temperature)
            .max_tokens(self.settings.max_tokens)
            .messages(vec![message])
            .build()?;

        debug!(
            "Sending completion request ({} prompt chars)",
            prompt.chars().count()
        );
        let response = self.client.chat().create(request).await?;

        let text: String = response
            .choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .collect();
        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }
}
