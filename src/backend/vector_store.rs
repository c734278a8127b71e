//! Vector search contract and a Milvus-style REST client

use super::http::{build_client, classify_transport, join_url, read_json};
use super::BackendError;
use crate::retrieval::DocumentKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// What the dense search score means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenseMetric {
    /// Cosine similarity in [-1, 1], higher is better
    #[default]
    CosineSimilarity,
    /// Cosine distance (1 - similarity), lower is better
    CosineDistance,
}

/// One hit from a dense or sparse search, best-first within its list
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub key: DocumentKey,
    /// Raw backend score: similarity/distance for dense, keyword score for sparse
    pub score: f64,
    /// Stored fields returned with the hit
    pub fields: BTreeMap<String, Value>,
}

/// Dense and sparse search entry points on the same index
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn dense_search(
        &self,
        index_name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>, BackendError>;

    async fn sparse_search(
        &self,
        index_name: &str,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<VectorHit>, BackendError>;

    fn dense_metric(&self) -> DenseMetric {
        DenseMetric::CosineSimilarity
    }
}

/// Client for the Milvus v2 REST search endpoint.
///
/// Dense searches go against `dense_field`; sparse searches send raw text
/// to `sparse_field`, which the server scores with its BM25 function.
pub struct HttpVectorStore {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    dense_field: String,
    sparse_field: String,
    metric: DenseMetric,
}

#[derive(Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Vec<Map<String, Value>>,
}

impl HttpVectorStore {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        dense_field: impl Into<String>,
        sparse_field: impl Into<String>,
        metric: DenseMetric,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into(),
            token,
            dense_field: dense_field.into(),
            sparse_field: sparse_field.into(),
            metric,
        })
    }

    async fn search(
        &self,
        index_name: &str,
        data: Value,
        anns_field: &str,
        limit: usize,
    ) -> Result<Vec<VectorHit>, BackendError> {
        let what = format!("vector search on {index_name}");
        let mut request = self
            .client
            .post(join_url(&self.endpoint, "v2/vectordb/entities/search"))
            .json(&serde_json::json!({
                "collectionName": index_name,
                "data": [data],
                "annsField": anns_field,
                "limit": limit,
                "outputFields": ["*"],
            }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(&what, e))?;
        let envelope: SearchEnvelope = read_json(&what, response).await?;

        if envelope.code != 0 {
            let message = envelope.message.unwrap_or_default();
            let lowered = message.to_lowercase();
            let detail = format!("{what}: code {}: {message}", envelope.code);
            return Err(
                if lowered.contains("not found")
                    || lowered.contains("not exist")
                    || lowered.contains("can't find")
                {
                    BackendError::NotFound(detail)
                } else {
                    BackendError::Unavailable(detail)
                },
            );
        }

        envelope.data.into_iter().map(parse_hit).collect()
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn dense_search(
        &self,
        index_name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>, BackendError> {
        self.search(index_name, serde_json::json!(vector), &self.dense_field, limit)
            .await
    }

    async fn sparse_search(
        &self,
        index_name: &str,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<VectorHit>, BackendError> {
        self.search(
            index_name,
            Value::String(query_text.to_string()),
            &self.sparse_field,
            limit,
        )
        .await
    }

    fn dense_metric(&self) -> DenseMetric {
        self.metric
    }
}

/// Turn one result row into a hit; the document key comes from
/// `source_id`/`document_id`, falling back to the primary key.
fn parse_hit(row: Map<String, Value>) -> Result<VectorHit, BackendError> {
    let mut fields: BTreeMap<String, Value> = row.into_iter().collect();

    let score = fields
        .remove("distance")
        .or_else(|| fields.remove("score"))
        .and_then(|v| v.as_f64())
        .ok_or_else(|| BackendError::Malformed("search hit without a score".to_string()))?;

    let source_id = ["source_id", "document_id", "doc_id", "id"]
        .iter()
        .find_map(|name| fields.get(*name).and_then(value_as_string))
        .ok_or_else(|| BackendError::Malformed("search hit without a document id".to_string()))?;

    let chunk_index = fields.get("chunk_index").and_then(Value::as_i64);

    Ok(VectorHit {
        key: DocumentKey::new(source_id, chunk_index),
        score,
        fields,
    })
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
