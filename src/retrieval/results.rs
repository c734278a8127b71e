//! Normalized search results and per-handler / aggregated outcomes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Which backend produced a result.
///
/// Serialized as its display string (`private`, `shared`, `external:<name>`)
/// so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SourceType {
    Private,
    Shared,
    /// Federated source, by configured name
    External(String),
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Private => f.write_str("private"),
            Self::Shared => f.write_str("shared"),
            Self::External(name) => write!(f, "external:{name}"),
        }
    }
}

impl From<SourceType> for String {
    fn from(source: SourceType) -> Self {
        source.to_string()
    }
}

impl TryFrom<String> for SourceType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "private" => Ok(Self::Private),
            "shared" => Ok(Self::Shared),
            other => match other.strip_prefix("external:") {
                Some(name) if !name.is_empty() => Ok(Self::External(name.to_string())),
                _ => Err(format!("unknown source type: {other}")),
            },
        }
    }
}

/// A single retrieved passage with its score on the common 0-100 scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Relevance on 0-100, comparable across handlers
    pub score: f64,

    /// Document identifier within its source
    pub source_id: String,

    pub text: String,

    pub source_type: SourceType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Unix epoch seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,

    /// Backend fields with no typed counterpart
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub raw_metadata: BTreeMap<String, Value>,
}

impl SearchResult {
    pub fn new(
        source_type: SourceType,
        source_id: impl Into<String>,
        text: impl Into<String>,
        score: f64,
    ) -> Self {
        Self {
            score,
            source_id: source_id.into(),
            text: text.into(),
            source_type,
            chunk_index: None,
            page_number: None,
            title: None,
            url: None,
            created_at: None,
            raw_metadata: BTreeMap::new(),
        }
    }

    pub fn with_chunk_index(mut self, chunk_index: i64) -> Self {
        self.chunk_index = Some(chunk_index);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Untyped metadata lookup
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.raw_metadata.get(key)
    }

    /// Title if known, otherwise the document id
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.source_id)
    }

    /// Get a short preview of the text (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        if self.text.chars().count() <= max_chars {
            self.text.clone()
        } else {
            let head: String = self.text.chars().take(max_chars).collect();
            format!("{head}...")
        }
    }
}

/// Descending by score, total order on floats
pub fn sort_by_score_desc(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Failure classification shared by handlers and the aggregated response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid identity combination
    Scope,
    /// Network or backend outage; worth retrying later
    BackendUnavailable,
    /// Caller credential rejected by the backend
    AuthorizationDenied,
    /// Named collection or source does not exist
    NotFound,
    /// Handler exceeded its deadline
    Timeout,
    /// Backend answered with a payload we could not interpret
    MalformedResponse,
    /// Handler task panicked or was cancelled
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scope => "scope",
            Self::BackendUnavailable => "backend_unavailable",
            Self::AuthorizationDenied => "authorization_denied",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::MalformedResponse => "malformed_response",
            Self::Internal => "internal",
        }
    }

    /// Transient failures: the source exists but could not answer right now
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable | Self::Timeout | Self::MalformedResponse | Self::Internal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a handler produced no results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of one handler.
///
/// Built only through [`HandlerResult::success`] and [`HandlerResult::failure`]:
/// a failed result never carries results, a successful one never carries an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerResult {
    pub source_type: SourceType,
    pub results: Vec<SearchResult>,
    pub success: bool,
    pub error: Option<HandlerFailure>,
    pub generated_answer: Option<String>,
    pub elapsed: Duration,
}

impl HandlerResult {
    pub fn success(
        source_type: SourceType,
        results: Vec<SearchResult>,
        generated_answer: Option<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            source_type,
            results,
            success: true,
            error: None,
            generated_answer: generated_answer.filter(|a| !a.trim().is_empty()),
            elapsed,
        }
    }

    pub fn failure(
        source_type: SourceType,
        kind: ErrorKind,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = kind.as_str().to_string();
        }
        Self {
            source_type,
            results: Vec::new(),
            success: false,
            error: Some(HandlerFailure { kind, message }),
            generated_answer: None,
            elapsed,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

/// Where the final answer text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOrigin {
    /// Sole requested source's own answer, returned verbatim
    SourceVerbatim,
    /// Synthesized by the completion service from high-confidence results
    Synthesized,
    /// Completion failed; answer assembled from source answers or a fixed message
    Fallback,
    /// Nothing relevant; the completion service was not called
    NoInformation,
}

/// A source that failed, surfaced so callers can tell "missing" from "down"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source_type: SourceType,
    pub kind: ErrorKind,
    pub message: String,
}

/// Final merged, filtered and answered response for one question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResponse {
    /// High-confidence results, best first
    pub results: Vec<SearchResult>,

    /// Below-threshold results; `Some` only when the caller opted in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_confidence: Option<Vec<SearchResult>>,

    pub synthesized_answer: String,

    pub answer_origin: AnswerOrigin,

    /// Results collected from all successful handlers, before truncation
    pub total_retrieved: usize,

    /// High-confidence results after threshold filtering
    pub total_after_filter: usize,

    pub threshold_applied: f64,

    /// Answers generated by individual handlers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_answers: BTreeMap<SourceType, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<SourceFailure>,

    /// Tokens consumed by synthesis, when the completion service reports them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
}

impl AggregatedResponse {
    /// Empty response carrying only a fixed message
    pub fn empty(message: impl Into<String>, threshold: f64) -> Self {
        Self {
            results: Vec::new(),
            low_confidence: None,
            synthesized_answer: message.into(),
            answer_origin: AnswerOrigin::NoInformation,
            total_retrieved: 0,
            total_after_filter: 0,
            threshold_applied: threshold,
            source_answers: BTreeMap::new(),
            failures: Vec::new(),
            token_count: None,
        }
    }

    /// Sources that reported NotFound (e.g. a named collection that was never created)
    pub fn missing_sources(&self) -> Vec<&SourceType> {
        self.failures
            .iter()
            .filter(|f| f.kind == ErrorKind::NotFound)
            .map(|f| &f.source_type)
            .collect()
    }

    pub fn has_results(&self) -> bool {
        !self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_never_carries_results() {
        let result = HandlerResult::failure(
            SourceType::Shared,
            ErrorKind::BackendUnavailable,
            "connection refused",
            Duration::from_millis(3),
        );
        assert!(!result.success);
        assert!(result.results.is_empty());
        assert_eq!(result.error_kind(), Some(ErrorKind::BackendUnavailable));
        assert_eq!(result.error_message(), Some("connection refused"));
    }

    #[test]
    fn failure_message_is_never_empty() {
        let result =
            HandlerResult::failure(SourceType::Private, ErrorKind::Timeout, "", Duration::ZERO);
        assert_eq!(result.error_message(), Some("timeout"));
    }

    #[test]
    fn success_drops_blank_answers() {
        let result = HandlerResult::success(
            SourceType::Private,
            vec![],
            Some("   ".to_string()),
            Duration::ZERO,
        );
        assert!(result.success);
        assert!(result.error.is_none());
        assert!(result.generated_answer.is_none());
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let result = SearchResult::new(SourceType::Shared, "doc", "héllo wörld", 50.0);
        assert_eq!(result.preview(5), "héllo...");
        assert_eq!(result.preview(50), "héllo wörld");
    }

    #[test]
    fn source_type_display() {
        assert_eq!(SourceType::Private.to_string(), "private");
        assert_eq!(
            SourceType::External("wiki".into()).to_string(),
            "external:wiki"
        );
    }

    #[test]
    fn source_type_keys_json_maps() {
        let mut answers = BTreeMap::new();
        answers.insert(SourceType::External("wiki".into()), "answer".to_string());
        let json = serde_json::to_string(&answers).unwrap();
        assert_eq!(json, r#"{"external:wiki":"answer"}"#);

        let back: BTreeMap<SourceType, String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, answers);
    }

    #[test]
    fn missing_sources_only_lists_not_found() {
        let mut response = AggregatedResponse::empty("none", 70.0);
        response.failures = vec![
            SourceFailure {
                source_type: SourceType::Shared,
                kind: ErrorKind::NotFound,
                message: "collection missing".into(),
            },
            SourceFailure {
                source_type: SourceType::External("wiki".into()),
                kind: ErrorKind::Timeout,
                message: "deadline".into(),
            },
        ];
        assert_eq!(response.missing_sources(), vec![&SourceType::Shared]);
    }
}
