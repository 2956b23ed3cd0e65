//! Chat-completions client for OpenAI-compatible endpoints
//!
//! Works against any `/v1/chat/completions` implementation (NVIDIA API
//! catalog, `OpenAI`, local servers).

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::service::{LanguageModel, ServiceError, ServiceResult};
use crate::session::Turn;
use crate::{Error, Result};

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    completion_tokens: u32,
}

/// Language model reached over an OpenAI-compatible HTTP API
pub struct ChatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl ChatModel {
    /// Create a chat client
    ///
    /// # Errors
    ///
    /// Returns error if the API key or model is missing
    pub fn new(base_url: &str, api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("LLM API key required".to_string()));
        }
        if model.is_empty() {
            return Err(Error::Config("LLM model required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: SecretString::from(api_key),
            model,
            max_tokens: 1024,
            temperature: 0.7,
        })
    }

    /// Set generation limits
    #[must_use]
    pub const fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// System message first, then the turns in chronological order
fn build_messages<'a>(history: &'a [Turn], system_context: &'a str) -> Vec<ChatMessage<'a>> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if !system_context.is_empty() {
        messages.push(ChatMessage {
            role: "system",
            content: system_context,
        });
    }
    messages.extend(history.iter().map(|turn| ChatMessage {
        role: turn.role().as_str(),
        content: turn.text(),
    }));
    messages
}

#[async_trait]
impl LanguageModel for ChatModel {
    async fn generate(&self, history: &[Turn], system_context: &str) -> ServiceResult<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: build_messages(history, system_context),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            "calling language model"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completion error");
            return Err(ServiceError::from_status("LLM", status, &body));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Fatal(format!("malformed chat completion: {e}")))?;

        let text = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ServiceError::fatal("chat completion had no content"))?;

        tracing::info!(
            reply_chars = text.len(),
            completion_tokens = result.usage.map(|u| u.completion_tokens),
            "language model responded"
        );
        Ok(text)
    }

    async fn probe(&self) -> ServiceResult<()> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(base_url = %self.base_url, "language model reachable");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ServiceError::from_status("LLM", status, &body))
        }
    }
}
