//! Hybrid search over a tenant's private or shared vector indexes

use super::normalize::{clamp_score, normalize_dense, normalize_keyword, normalize_timestamp};
use super::prompt::{build_user_prompt, render_system_prompt};
use super::{HandlerError, HandlerOptions, SearchHandler};
use crate::backend::{BackendError, Backends, DenseMetric, VectorHit};
use crate::retrieval::{
    deduplicate_results, sort_by_score_desc, HandlerResult, HybridFusionEngine, SearchMode,
    SearchResult, SourceType,
};
use crate::scope::{ResolvedScope, ScopeKind};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Object-store category holding uploaded documents and their metadata
pub const DOCUMENTS_CATEGORY: &str = "documents";

/// Stored fields consumed into typed `SearchResult` fields or never surfaced
const CONSUMED_FIELDS: &[&str] = &[
    "text",
    "content",
    "chunk_text",
    "title",
    "page_number",
    "page",
    "url",
    "created_at",
    "chunk_index",
    "source_id",
    "embedding",
    "sparse",
    "vector",
];

/// Tuning for [`VectorScopeHandler`]
#[derive(Debug, Clone)]
pub struct VectorHandlerSettings {
    pub mode: SearchMode,
    pub fusion: HybridFusionEngine,
    /// Generate a per-scope answer when a completion backend is available
    pub scope_answers: bool,
    /// Results fed into the per-scope answer
    pub answer_top_n: usize,
    pub system_prompt: String,
}

impl Default for VectorHandlerSettings {
    fn default() -> Self {
        Self {
            mode: SearchMode::Hybrid,
            fusion: HybridFusionEngine::default(),
            scope_answers: false,
            answer_top_n: 5,
            system_prompt: "Answer the question using only the provided context.".to_string(),
        }
    }
}

/// Searches every resolved index of one scope kind and merges the results
pub struct VectorScopeHandler {
    kind: ScopeKind,
    scopes: Vec<ResolvedScope>,
    backends: Backends,
    settings: VectorHandlerSettings,
    options: HandlerOptions,
}

impl VectorScopeHandler {
    pub fn new(
        kind: ScopeKind,
        scopes: Vec<ResolvedScope>,
        backends: Backends,
        settings: VectorHandlerSettings,
        options: HandlerOptions,
    ) -> Self {
        Self {
            kind,
            scopes,
            backends,
            settings,
            options,
        }
    }

    pub fn index_names(&self) -> Vec<&str> {
        self.scopes.iter().map(|s| s.index_name.as_str()).collect()
    }

    async fn run(
        &self,
        question: &str,
        top_k: usize,
        min_relevance_score: f64,
    ) -> Result<(Vec<SearchResult>, Option<String>), HandlerError> {
        if top_k == 0 || self.scopes.is_empty() {
            return Ok((Vec::new(), None));
        }

        let vector = if self.settings.mode.uses_dense() {
            Some(
                self.backends
                    .embedder
                    .embed(question)
                    .await
                    .map_err(HandlerError::Embedding)?,
            )
        } else {
            None
        };

        let outcomes = join_all(
            self.scopes
                .iter()
                .map(|scope| self.search_index(scope, question, vector.as_deref(), top_k)),
        )
        .await;

        let mut merged = Vec::new();
        for (scope, outcome) in self.scopes.iter().zip(outcomes) {
            match outcome {
                Ok(results) => {
                    tracing::debug!(
                        index = %scope.index_name,
                        count = results.len(),
                        "index returned results"
                    );
                    merged.extend(results);
                }
                Err(err) if err.is_not_found() => match scope.scope.collection_name() {
                    Some(collection) => {
                        return Err(HandlerError::CollectionNotFound {
                            collection: collection.to_string(),
                            index: scope.index_name.clone(),
                        });
                    }
                    // Default index not created yet: nothing uploaded to this scope.
                    None => {
                        tracing::debug!(index = %scope.index_name, "index does not exist yet");
                    }
                },
                Err(err) => {
                    return Err(HandlerError::Search {
                        index: scope.index_name.clone(),
                        source: err,
                    });
                }
            }
        }

        sort_by_score_desc(&mut merged);
        let mut merged = deduplicate_results(merged);
        merged.truncate(top_k);

        let answer = self.scope_answer(question, &merged, min_relevance_score).await;
        Ok((merged, answer))
    }

    async fn search_index(
        &self,
        scope: &ResolvedScope,
        question: &str,
        vector: Option<&[f32]>,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, BackendError> {
        let mode = self.settings.mode;
        let limit = mode.candidate_limit(top_k);
        let index = scope.index_name.as_str();
        let store = &self.backends.vector_store;

        let dense = async {
            match vector {
                Some(v) => store.dense_search(index, v, limit).await,
                None => Ok(Vec::new()),
            }
        };
        let sparse = async {
            if mode.uses_sparse() {
                store.sparse_search(index, question, limit).await
            } else {
                Ok(Vec::new())
            }
        };
        let (dense, sparse) = tokio::join!(dense, sparse);
        let dense = rank_dense(dense?, store.dense_metric());
        let sparse = scale_keyword(sparse?);

        let source_type = self.source_type();
        let mut results: Vec<SearchResult> = match mode {
            SearchMode::Semantic => to_results(dense, top_k, &source_type),
            SearchMode::Keyword => to_results(sparse, top_k, &source_type),
            SearchMode::Hybrid => self.fuse(dense, sparse, top_k, &source_type),
        };

        self.enrich_titles(scope, &mut results).await;
        Ok(results)
    }

    fn fuse(
        &self,
        dense: Vec<VectorHit>,
        sparse: Vec<VectorHit>,
        top_k: usize,
        source_type: &SourceType,
    ) -> Vec<SearchResult> {
        // Both lists carry 0-100 scores here.
        let dense_ranked: Vec<_> = dense.iter().map(|h| (h.key.clone(), h.score)).collect();
        let sparse_ranked: Vec<_> = sparse.iter().map(|h| (h.key.clone(), h.score)).collect();
        let fused = self
            .settings
            .fusion
            .fuse(&dense_ranked, &sparse_ranked, top_k);

        // Dense rows win when both lists carry the same document.
        let mut hits: HashMap<_, VectorHit> = HashMap::new();
        for hit in sparse.into_iter().chain(dense) {
            hits.insert(hit.key.clone(), hit);
        }

        fused
            .into_iter()
            .filter_map(|entry| {
                let hit = hits.remove(&entry.document_key)?;
                let mut result = hit_to_result(hit, clamp_score(entry.normalized_score), source_type);
                if let Some(rank) = entry.dense_rank {
                    result.raw_metadata.insert("dense_rank".into(), Value::from(rank));
                }
                if let Some(rank) = entry.sparse_rank {
                    result.raw_metadata.insert("sparse_rank".into(), Value::from(rank));
                }
                Some(result)
            })
            .collect()
    }

    /// Fill missing titles from object-store metadata; lookups never fail the search
    async fn enrich_titles(&self, scope: &ResolvedScope, results: &mut [SearchResult]) {
        let Some(store) = &self.backends.metadata else {
            return;
        };
        let key_prefix = scope.key_prefix(DOCUMENTS_CATEGORY);

        let lookups = join_all(results.iter().map(|result| {
            let key_prefix = key_prefix.as_str();
            async move {
                if result.title.is_some() {
                    return None;
                }
                match store
                    .document_metadata(&scope.bucket_name, key_prefix, &result.source_id)
                    .await
                {
                    Ok(meta) => meta.and_then(|m| m.title.or(m.filename)),
                    Err(err) => {
                        tracing::debug!(
                            source_id = %result.source_id,
                            error = %err,
                            "metadata lookup failed, using defaults"
                        );
                        None
                    }
                }
            }
        }))
        .await;

        for (result, title) in results.iter_mut().zip(lookups) {
            if let Some(title) = title {
                result.title = Some(title);
            }
        }
    }

    /// Advisory per-scope answer; any failure means "no answer"
    async fn scope_answer(
        &self,
        question: &str,
        results: &[SearchResult],
        min_relevance_score: f64,
    ) -> Option<String> {
        if !self.settings.scope_answers {
            return None;
        }
        let completion = self.backends.completion.as_ref()?;

        let context: Vec<SearchResult> = results
            .iter()
            .filter(|r| r.score >= min_relevance_score)
            .take(self.settings.answer_top_n)
            .cloned()
            .collect();
        if context.is_empty() {
            return None;
        }

        let system = render_system_prompt(&self.settings.system_prompt, &self.options);
        let user = build_user_prompt(question, &context);
        match completion.complete(&system, &user).await {
            Ok(completion) => Some(completion.text),
            Err(err) => {
                tracing::warn!(source = %self.source_type(), error = %err, "scope answer generation failed");
                None
            }
        }
    }
}

#[async_trait]
impl SearchHandler for VectorScopeHandler {
    fn source_type(&self) -> SourceType {
        match self.kind {
            ScopeKind::Private => SourceType::Private,
            ScopeKind::Shared => SourceType::Shared,
        }
    }

    async fn search(&self, question: &str, top_k: usize, min_relevance_score: f64) -> HandlerResult {
        let started = Instant::now();
        match self.run(question, top_k, min_relevance_score).await {
            Ok((results, answer)) => {
                HandlerResult::success(self.source_type(), results, answer, started.elapsed())
            }
            Err(err) => {
                tracing::warn!(source = %self.source_type(), error = %err, "vector scope search failed");
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

/// Dense hits on the 0-100 scale, best first whatever the metric
fn rank_dense(mut hits: Vec<VectorHit>, metric: DenseMetric) -> Vec<VectorHit> {
    for hit in &mut hits {
        hit.score = normalize_dense(hit.score, metric);
    }
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits
}

/// Keyword hits relative to the best score in the list, backend order kept
fn scale_keyword(mut hits: Vec<VectorHit>) -> Vec<VectorHit> {
    let max_observed = hits.iter().map(|h| h.score).fold(0.0_f64, f64::max);
    for hit in &mut hits {
        hit.score = normalize_keyword(hit.score, max_observed);
    }
    hits
}

fn to_results(hits: Vec<VectorHit>, top_k: usize, source_type: &SourceType) -> Vec<SearchResult> {
    hits.into_iter()
        .take(top_k)
        .map(|hit| {
            let score = hit.score;
            hit_to_result(hit, score, source_type)
        })
        .collect()
}

/// Map a stored row onto the typed result fields; leftovers go to `raw_metadata`
fn hit_to_result(hit: VectorHit, score: f64, source_type: &SourceType) -> SearchResult {
    let fields = hit.fields;
    let text = ["text", "content", "chunk_text"]
        .iter()
        .find_map(|name| fields.get(*name).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    let mut result = SearchResult::new(source_type.clone(), hit.key.source_id, text, score);
    result.chunk_index = hit.key.chunk_index;
    result.title = string_field(&fields, "title");
    result.url = string_field(&fields, "url");
    result.page_number = fields
        .get("page_number")
        .or_else(|| fields.get("page"))
        .and_then(Value::as_i64);
    result.created_at = fields.get("created_at").and_then(normalize_timestamp);
    result.raw_metadata = fields
        .into_iter()
        .filter(|(name, _)| !CONSUMED_FIELDS.contains(&name.as_str()))
        .collect::<BTreeMap<_, _>>();
    result
}

fn string_field(fields: &BTreeMap<String, Value>, name: &str) -> Option<String> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}
