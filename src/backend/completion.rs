//! LLM completion contract and an OpenAI-compatible chat client

use super::http::{build_client, classify_transport, join_url, read_json};
use super::BackendError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Generated text plus the token count reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub token_count: Option<u32>,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, BackendError>;
}

/// Chat completions over `/chat/completions` (OpenAI, Groq, Ollama, vLLM, ...)
pub struct OpenAiCompletionProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

impl OpenAiCompletionProvider {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            temperature,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletionProvider {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, BackendError> {
        let mut request = self
            .client
            .post(join_url(&self.endpoint, "chat/completions"))
            .json(&serde_json::json!({
                "model": self.model,
                "temperature": self.temperature,
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_prompt},
                ],
            }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport("completion", e))?;
        let body: ChatResponse = read_json("completion", response).await?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| BackendError::Malformed("completion without content".to_string()))?;

        Ok(Completion {
            text,
            token_count: body.usage.map(|u| u.total_tokens),
        })
    }
}
