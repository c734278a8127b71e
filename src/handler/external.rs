//! Delegates a question to a federated external search service

use super::normalize::{normalize_external, normalize_timestamp, position_score};
use super::{HandlerError, HandlerOptions, SearchHandler};
use crate::backend::{Citation, FederatedRequest, FederatedSearch};
use crate::retrieval::{sort_by_score_desc, HandlerResult, SearchResult, SourceType};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

pub struct ExternalSourceHandler {
    name: String,
    client: Arc<dyn FederatedSearch>,
    credential: Option<String>,
    options: HandlerOptions,
    page: u32,
}

impl ExternalSourceHandler {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn FederatedSearch>,
        credential: Option<String>,
        options: HandlerOptions,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            credential,
            options,
            page: 1,
        }
    }

    /// Request a later page of remote results (1-based)
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        question: &str,
        top_k: usize,
        min_relevance_score: f64,
    ) -> Result<(Vec<SearchResult>, Option<String>), HandlerError> {
        let request = FederatedRequest {
            question: question.to_string(),
            source: self.name.clone(),
            top_k,
            // Remote side expects relevance in [0, 1]
            min_relevance_score: min_relevance_score / 100.0,
            page: self.page,
            credential: self.credential.clone(),
            options: self.options.clone(),
        };

        let response = self
            .client
            .search(&request)
            .await
            .map_err(|error| HandlerError::External {
                source_name: self.name.clone(),
                error,
            })?;

        let source_type = self.source_type();
        let mut results: Vec<SearchResult> = response
            .citations
            .into_iter()
            .enumerate()
            .map(|(position, citation)| citation_to_result(&self.name, &source_type, position, citation))
            .collect();
        sort_by_score_desc(&mut results);
        results.truncate(top_k);

        Ok((results, response.answer))
    }
}

#[async_trait]
impl SearchHandler for ExternalSourceHandler {
    fn source_type(&self) -> SourceType {
        SourceType::External(self.name.clone())
    }

    async fn search(&self, question: &str, top_k: usize, min_relevance_score: f64) -> HandlerResult {
        let started = Instant::now();
        match self.run(question, top_k, min_relevance_score).await {
            Ok((results, answer)) => {
                tracing::debug!(source = %self.name, count = results.len(), "external source answered");
                HandlerResult::success(self.source_type(), results, answer, started.elapsed())
            }
            Err(err) => {
                tracing::warn!(source = %self.name, error = %err, "external source failed");
                HandlerResult::failure(
                    self.source_type(),
                    err.kind(),
                    err.to_string(),
                    started.elapsed(),
                )
            }
        }
    }
}

fn citation_to_result(
    source_name: &str,
    source_type: &SourceType,
    position: usize,
    citation: Citation,
) -> SearchResult {
    let source_id = citation
        .source_id
        .as_ref()
        .and_then(value_to_id)
        .or_else(|| citation.url.clone())
        .unwrap_or_else(|| format!("{source_name}-{position}"));
    let score = match citation.score {
        Some(raw) => normalize_external(raw),
        None => position_score(position),
    };

    let mut result = SearchResult::new(
        source_type.clone(),
        source_id,
        citation.text.unwrap_or_default(),
        score,
    );
    result.chunk_index = citation.chunk_index;
    result.page_number = citation.page_number;
    result.title = citation.title.filter(|t| !t.trim().is_empty());
    result.url = citation.url;
    result.created_at = citation.created_at.as_ref().and_then(normalize_timestamp);
    result.raw_metadata = citation.extra;
    result
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, FederatedResponse};
    use crate::retrieval::ErrorKind;
    use std::sync::Mutex;

    struct CannedSource {
        reply: Result<FederatedResponse, BackendError>,
        seen: Mutex<Vec<FederatedRequest>>,
    }

    impl CannedSource {
        fn new(reply: Result<FederatedResponse, BackendError>) -> Self {
            Self {
                reply,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FederatedSearch for CannedSource {
        async fn search(&self, request: &FederatedRequest) -> Result<FederatedResponse, BackendError> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.clone()
        }
    }

    fn citation(value: serde_json::Value) -> Citation {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn citations_become_scored_results() {
        let source = Arc::new(CannedSource::new(Ok(FederatedResponse {
            answer: Some("Revenue grew 12%.".into()),
            citations: vec![
                citation(serde_json::json!({"id": 7, "content": "low", "score": 0.3})),
                citation(serde_json::json!({"document_id": "q3", "content": "high", "relevance_score": 0.82, "author": "cfo"})),
                citation(serde_json::json!({"link": "https://wiki.example/x", "snippet": "no score"})),
            ],
        })));
        let handler = ExternalSourceHandler::new(
            "wiki",
            source.clone(),
            Some("token".into()),
            HandlerOptions::default(),
        );

        let result = handler.search("How did revenue change?", 10, 60.0).await;
        assert!(result.success);
        assert_eq!(result.source_type, SourceType::External("wiki".into()));
        assert_eq!(result.generated_answer.as_deref(), Some("Revenue grew 12%."));

        let ids: Vec<_> = result.results.iter().map(|r| r.source_id.as_str()).collect();
        // position 2 without a score decays to 100 / 1.2
        assert_eq!(ids, vec!["https://wiki.example/x", "q3", "7"]);
        assert!((result.results[1].score - 82.0).abs() < 1e-9);
        assert_eq!(result.results[1].metadata("author"), Some(&serde_json::json!("cfo")));

        let seen = source.seen.lock().unwrap();
        assert_eq!(seen[0].source, "wiki");
        assert_eq!(seen[0].credential.as_deref(), Some("token"));
        assert!((seen[0].min_relevance_score - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn results_truncated_to_top_k() {
        let citations = (0..5)
            .map(|i| citation(serde_json::json!({"id": format!("c{i}"), "content": "x"})))
            .collect();
        let source = Arc::new(CannedSource::new(Ok(FederatedResponse {
            answer: None,
            citations,
        })));
        let handler = ExternalSourceHandler::new("docs", source, None, HandlerOptions::default());

        let result = handler.search("q", 2, 0.0).await;
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results[0].source_id, "c0");
        assert!(result.generated_answer.is_none());
    }

    #[tokio::test]
    async fn backend_errors_are_classified() {
        let source = Arc::new(CannedSource::new(Err(BackendError::Unauthorized(
            "expired token".into(),
        ))));
        let handler = ExternalSourceHandler::new("wiki", source, None, HandlerOptions::default());

        let result = handler.search("q", 5, 0.0).await;
        assert!(!result.success);
        assert!(result.results.is_empty());
        assert_eq!(result.error_kind(), Some(ErrorKind::AuthorizationDenied));
        assert!(result.error_message().unwrap().contains("wiki"));
    }
}
