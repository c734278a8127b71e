/// Embedding provider trait and OpenAI-compatible HTTP implementation
use super::http::{build_client, classify_transport, join_url, read_json};
use super::BackendError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Trait for embedding providers
///
/// Allows abstraction over different embedding backends (hosted APIs,
/// local inference servers, test fakes)
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Embeddings over the OpenAI `/embeddings` wire format
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model_name: String,
    api_key: Option<String>,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    pub fn new(
        endpoint: impl Into<String>,
        model_name: impl Into<String>,
        dimension: usize,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into(),
            model_name: model_name.into(),
            api_key,
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        if text.trim().is_empty() {
            return Err(BackendError::Rejected("cannot embed empty text".to_string()));
        }

        let mut request = self
            .client
            .post(join_url(&self.endpoint, "embeddings"))
            .json(&serde_json::json!({
                "model": self.model_name,
                "input": text,
            }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport("embedding", e))?;
        let body: EmbeddingResponse = read_json("embedding", response).await?;

        let embedding = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| BackendError::Malformed("No embeddings generated".to_string()))?;

        // Verify dimension
        if embedding.len() != self.dimension {
            return Err(BackendError::Malformed(format!(
                "Dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
