//! Read-only document metadata lookups in object storage

use super::http::{build_client, classify_transport, join_url, read_json};
use super::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Citation-relevant metadata stored next to an uploaded document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Metadata for `source_id` under `bucket/key_prefix`; `Ok(None)` when absent
    async fn document_metadata(
        &self,
        bucket: &str,
        key_prefix: &str,
        source_id: &str,
    ) -> Result<Option<DocumentMetadata>, BackendError>;
}

/// Reads `<source_id>.metadata.json` objects through an HTTP gateway
/// (S3-compatible endpoint with path-style addressing).
pub struct HttpMetadataStore {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpMetadataStore {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into(),
            token,
        })
    }

    fn object_url(&self, bucket: &str, key_prefix: &str, source_id: &str) -> String {
        join_url(
            &self.endpoint,
            &format!("{bucket}/{key_prefix}{source_id}.metadata.json"),
        )
    }
}

#[async_trait]
impl MetadataStore for HttpMetadataStore {
    async fn document_metadata(
        &self,
        bucket: &str,
        key_prefix: &str,
        source_id: &str,
    ) -> Result<Option<DocumentMetadata>, BackendError> {
        let url = self.object_url(bucket, key_prefix, source_id);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport("metadata lookup", e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json("metadata lookup", response).await.map(Some)
    }
}
