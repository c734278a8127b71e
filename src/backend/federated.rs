//! Federated external search: `POST {endpoint}/search`
//!
//! The remote service answers with `{success, answer, citations[]}`. Field
//! names vary between deployments, so citations accept the common aliases
//! and keep everything unrecognised in `extra`.

use super::http::{build_client, classify_transport, join_url, read_json};
use super::BackendError;
use crate::handler::HandlerOptions;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Question forwarded to a federated source
#[derive(Debug, Clone, Serialize)]
pub struct FederatedRequest {
    pub question: String,
    /// Source (bucket) name on the remote side
    pub source: String,
    pub top_k: usize,
    pub min_relevance_score: f64,
    /// 1-based result page
    pub page: u32,
    /// Caller credential, sent as a bearer token rather than in the body
    #[serde(skip)]
    pub credential: Option<String>,
    #[serde(skip_serializing_if = "HandlerOptions::is_empty")]
    pub options: HandlerOptions,
}

/// One citation as returned by the remote service.
///
/// Deployments name the same field differently and some send several
/// spellings at once, so each field takes the first key present in its
/// priority list. Losing spellings and unknown keys stay in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "BTreeMap<String, Value>")]
pub struct Citation {
    pub source_id: Option<Value>,
    pub text: Option<String>,
    /// Relevance as reported remotely, nominally in [0, 1]
    pub score: Option<f64>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub page_number: Option<i64>,
    pub chunk_index: Option<i64>,
    /// ISO-8601 string or epoch seconds/milliseconds
    pub created_at: Option<Value>,
    pub extra: BTreeMap<String, Value>,
}

const SOURCE_ID_KEYS: &[&str] = &["source_id", "document_id", "doc_id", "id"];
const TEXT_KEYS: &[&str] = &["text", "content", "snippet"];
const SCORE_KEYS: &[&str] = &["score", "relevance_score", "similarity"];
const TITLE_KEYS: &[&str] = &["title"];
const URL_KEYS: &[&str] = &["url", "link"];
const PAGE_KEYS: &[&str] = &["page_number", "page"];
const CHUNK_KEYS: &[&str] = &["chunk_index", "chunk"];
const CREATED_AT_KEYS: &[&str] = &["created_at", "timestamp", "createdAt"];

impl From<BTreeMap<String, Value>> for Citation {
    fn from(mut fields: BTreeMap<String, Value>) -> Self {
        Self {
            source_id: take_first(&mut fields, SOURCE_ID_KEYS, |v| {
                (!v.is_null()).then(|| v.clone())
            }),
            text: take_first(&mut fields, TEXT_KEYS, as_text),
            score: take_first(&mut fields, SCORE_KEYS, as_number),
            title: take_first(&mut fields, TITLE_KEYS, as_text),
            url: take_first(&mut fields, URL_KEYS, as_text),
            page_number: take_first(&mut fields, PAGE_KEYS, as_integer),
            chunk_index: take_first(&mut fields, CHUNK_KEYS, as_integer),
            created_at: take_first(&mut fields, CREATED_AT_KEYS, |v| {
                (!v.is_null()).then(|| v.clone())
            }),
            extra: fields,
        }
    }
}

/// Remove and convert the first key in `keys` whose value converts
fn take_first<T>(
    fields: &mut BTreeMap<String, Value>,
    keys: &[&str],
    convert: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    let key = keys
        .iter()
        .find(|key| fields.get(**key).and_then(&convert).is_some())?;
    fields.remove(*key).as_ref().and_then(convert)
}

fn as_text(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Successful federated answer
#[derive(Debug, Clone, PartialEq)]
pub struct FederatedResponse {
    pub answer: Option<String>,
    pub citations: Vec<Citation>,
}

#[derive(Deserialize)]
struct WirePayload {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    citations: Vec<Citation>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
}

fn default_success() -> bool {
    true
}

#[async_trait]
pub trait FederatedSearch: Send + Sync {
    async fn search(&self, request: &FederatedRequest) -> Result<FederatedResponse, BackendError>;
}

pub struct HttpFederatedSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpFederatedSearch {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl FederatedSearch for HttpFederatedSearch {
    async fn search(&self, request: &FederatedRequest) -> Result<FederatedResponse, BackendError> {
        let what = format!("federated search on {}", request.source);
        let mut http = self
            .client
            .post(join_url(&self.endpoint, "search"))
            .json(request);
        if let Some(credential) = &request.credential {
            http = http.bearer_auth(credential);
        }

        let response = http
            .send()
            .await
            .map_err(|e| classify_transport(&what, e))?;
        let payload: WirePayload = read_json(&what, response).await?;

        if !payload.success {
            let message = payload
                .error
                .or(payload.message)
                .unwrap_or_else(|| "remote search reported failure".to_string());
            return Err(classify_reported_failure(
                &what,
                payload.error_code.as_deref(),
                message,
            ));
        }

        Ok(FederatedResponse {
            answer: payload.answer.filter(|a| !a.trim().is_empty()),
            citations: payload.citations,
        })
    }
}

/// A 2xx body with `success: false` still needs a failure class
fn classify_reported_failure(what: &str, code: Option<&str>, message: String) -> BackendError {
    let detail = format!("{what}: {message}");
    let lowered = message.to_lowercase();
    match code.map(str::to_ascii_lowercase).as_deref() {
        Some("not_found") => BackendError::NotFound(detail),
        Some("unauthorized") | Some("forbidden") => BackendError::Unauthorized(detail),
        Some("timeout") => BackendError::Timeout(detail),
        _ if lowered.contains("not found") || lowered.contains("does not exist") => {
            BackendError::NotFound(detail)
        }
        _ if lowered.contains("unauthorized") || lowered.contains("forbidden") => {
            BackendError::Unauthorized(detail)
        }
        _ => BackendError::Unavailable(detail),
    }
}
