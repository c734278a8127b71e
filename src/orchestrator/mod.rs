//! Query orchestration: scope expansion, authorization, concurrent dispatch
//!
//! One call to [`QueryOrchestrator::orchestrate`] walks a request through
//! `PENDING -> DISPATCHED -> COLLECTED -> DONE`. There is no failed state:
//! every handler failure is contained as a `HandlerResult`, and a request
//! with nothing to search still completes with an empty response.

mod aggregator;
mod auth;

pub use aggregator::{
    AggregationSettings, ResultAggregator, GENERATION_FAILED_MESSAGE, NO_INFORMATION_MESSAGE,
};
pub use auth::{AllowAll, ScopeAllowList, ScopeAuthorizer};

use crate::backend::Backends;
use crate::handler::{
    ExternalSourceHandler, HandlerOptions, SearchHandler, VectorHandlerSettings,
    VectorScopeHandler,
};
use crate::retrieval::{AggregatedResponse, ErrorKind, HandlerResult, SourceType};
use crate::scope::{CollectionFilter, ScopeError, ScopeIdentifier, ScopeKind, ScopeResolver};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

/// Scope as named by the caller, before expansion
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestedScope {
    Private,
    Shared,
    /// Expands to private and shared
    All,
    External(String),
}

impl fmt::Display for RequestedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Private => f.write_str("private"),
            Self::Shared => f.write_str("shared"),
            Self::All => f.write_str("all"),
            Self::External(name) => write!(f, "external:{name}"),
        }
    }
}

impl FromStr for RequestedScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "private" => return Ok(Self::Private),
            "shared" => return Ok(Self::Shared),
            "all" => return Ok(Self::All),
            _ => {}
        }
        match s.split_once(':') {
            Some((prefix, name)) if prefix.eq_ignore_ascii_case("external") && !name.trim().is_empty() => {
                Ok(Self::External(name.trim().to_string()))
            }
            _ => Err(format!(
                "unknown scope '{s}' (expected private, shared, all or external:<name>)"
            )),
        }
    }
}

/// Expand `All`, drop duplicates, keep first-seen order
pub fn expand_scopes(requested: &[RequestedScope]) -> Vec<SourceType> {
    let mut expanded: Vec<SourceType> = Vec::new();
    for scope in requested {
        let concrete = match scope {
            RequestedScope::Private => vec![SourceType::Private],
            RequestedScope::Shared => vec![SourceType::Shared],
            RequestedScope::All => vec![SourceType::Private, SourceType::Shared],
            RequestedScope::External(name) => vec![SourceType::External(name.clone())],
        };
        for source in concrete {
            if !expanded.contains(&source) {
                expanded.push(source);
            }
        }
    }
    expanded
}

/// Who is asking; read-only for the life of the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub tenant_id: String,
    pub user_id: Option<String>,
    /// Forwarded to federated sources as a bearer token
    pub credential: Option<String>,
}

impl CallerContext {
    pub fn new(tenant_id: impl Into<String>, user_id: Option<&str>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.map(str::to_string),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }
}

/// One question and how to search for it
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub question: String,
    pub scopes: Vec<RequestedScope>,
    pub collection_filters: Vec<CollectionFilter>,
    pub top_k: usize,
    /// Threshold on the 0-100 scale
    pub min_relevance_score: f64,
    pub include_low_confidence: bool,
    pub options: HandlerOptions,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>, scopes: Vec<RequestedScope>) -> Self {
        Self {
            question: question.into(),
            scopes,
            collection_filters: Vec::new(),
            top_k: 10,
            min_relevance_score: 0.0,
            include_low_confidence: false,
            options: HandlerOptions::default(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_relevance_score(mut self, score: f64) -> Self {
        self.min_relevance_score = score;
        self
    }

    pub fn with_low_confidence(mut self, include: bool) -> Self {
        self.include_low_confidence = include;
        self
    }

    pub fn with_collection_filter(mut self, filter: CollectionFilter) -> Self {
        self.collection_filters.push(filter);
        self
    }

    pub fn with_options(mut self, options: HandlerOptions) -> Self {
        self.options = options;
        self
    }
}

/// Request lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestPhase {
    Pending,
    Dispatched,
    Collected,
    Done,
}

impl RequestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Dispatched => "DISPATCHED",
            Self::Collected => "COLLECTED",
            Self::Done => "DONE",
        }
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct PhaseTracker {
    phase: RequestPhase,
    started: Instant,
}

impl PhaseTracker {
    fn start() -> Self {
        tracing::debug!(phase = %RequestPhase::Pending, "request accepted");
        Self {
            phase: RequestPhase::Pending,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: RequestPhase) {
        debug_assert!(next > self.phase, "phases only move forward");
        self.phase = next;
        tracing::debug!(
            phase = %next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "request phase"
        );
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Deadline for each vector scope handler
    pub handler_timeout: Duration,
    /// Per-source deadlines for federated sources; falls back to `handler_timeout`
    pub external_timeouts: BTreeMap<String, Duration>,
    pub vector: VectorHandlerSettings,
    pub aggregation: AggregationSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(30),
            external_timeouts: BTreeMap::new(),
            vector: VectorHandlerSettings::default(),
            aggregation: AggregationSettings::default(),
        }
    }
}

/// Handlers ready to dispatch, plus outcomes known before any I/O
pub struct ExecutionPlan {
    pub handlers: Vec<(Arc<dyn SearchHandler>, Duration)>,
    /// Requested federated sources with no configured client
    pub unresolved: Vec<HandlerResult>,
}

impl ExecutionPlan {
    /// Sources the caller asked about and is authorized for
    pub fn requested_sources(&self) -> usize {
        self.handlers.len() + self.unresolved.len()
    }

    pub fn sources(&self) -> Vec<SourceType> {
        self.handlers
            .iter()
            .map(|(h, _)| h.source_type())
            .chain(self.unresolved.iter().map(|r| r.source_type.clone()))
            .collect()
    }
}

pub struct QueryOrchestrator {
    resolver: ScopeResolver,
    backends: Backends,
    authorizer: Arc<dyn ScopeAuthorizer>,
    aggregator: ResultAggregator,
    settings: OrchestratorSettings,
}

impl QueryOrchestrator {
    pub fn new(
        resolver: ScopeResolver,
        backends: Backends,
        authorizer: Arc<dyn ScopeAuthorizer>,
        settings: OrchestratorSettings,
    ) -> Self {
        let aggregator =
            ResultAggregator::new(backends.completion.clone(), settings.aggregation.clone());
        Self {
            resolver,
            backends,
            authorizer,
            aggregator,
            settings,
        }
    }

    pub fn resolver(&self) -> &ScopeResolver {
        &self.resolver
    }

    /// Answer one question across every requested, authorized scope.
    ///
    /// # Errors
    /// [`ScopeError`] for an invalid identity (e.g. a private scope without
    /// a user id), raised before any backend is contacted. Backend failures
    /// never surface here; they are reported in the response's `failures`.
    pub async fn orchestrate(
        &self,
        caller: &CallerContext,
        request: &QueryRequest,
    ) -> Result<AggregatedResponse, ScopeError> {
        let span = tracing::info_span!(
            "orchestrate",
            request_id = %Uuid::new_v4(),
            tenant = %caller.tenant_id,
        );
        async {
            let mut tracker = PhaseTracker::start();
            tracing::trace!(question = %request.question, "question received");
            let plan = self.plan(caller, request)?;
            let requested_sources = plan.requested_sources();

            tracker.advance(RequestPhase::Dispatched);
            let mut outcomes = dispatch(
                plan.handlers,
                &request.question,
                request.top_k,
                request.min_relevance_score,
            )
            .await;
            outcomes.extend(plan.unresolved);

            tracker.advance(RequestPhase::Collected);
            let failed = outcomes.iter().filter(|o| !o.success).count();
            let response = self
                .aggregator
                .aggregate(request, requested_sources, outcomes)
                .await;

            tracker.advance(RequestPhase::Done);
            tracing::info!(
                sources = requested_sources,
                failed,
                results = response.results.len(),
                total_retrieved = response.total_retrieved,
                elapsed_ms = tracker.started.elapsed().as_millis() as u64,
                "query answered"
            );
            Ok::<_, ScopeError>(response)
        }
        .instrument(span)
        .await
    }

    /// Expand and authorize the requested scopes, validate identity for the
    /// authorized ones, then build handlers.
    ///
    /// Pure with respect to I/O: a [`ScopeError`] here means nothing was sent.
    pub fn plan(
        &self,
        caller: &CallerContext,
        request: &QueryRequest,
    ) -> Result<ExecutionPlan, ScopeError> {
        let sources = expand_scopes(&request.scopes);

        let mut vector_scopes = Vec::new();
        for source in &sources {
            let kind = match source {
                SourceType::Private => ScopeKind::Private,
                SourceType::Shared => ScopeKind::Shared,
                SourceType::External(_) => continue,
            };
            // Unauthorized kinds are dropped before their identity is checked.
            if !self.authorizer.is_authorized(caller, source) {
                tracing::debug!(source = %source, "scope not authorized, dropped");
                continue;
            }
            let identifiers = self.identifiers_for(caller, kind, &request.collection_filters)?;
            vector_scopes.push((source.clone(), kind, identifiers));
        }

        let mut plan = ExecutionPlan {
            handlers: Vec::new(),
            unresolved: Vec::new(),
        };

        for (source, kind, identifiers) in vector_scopes {
            if identifiers.is_empty() {
                tracing::debug!(source = %source, "no collection filter applies, skipped");
                continue;
            }
            let resolved = identifiers
                .iter()
                .map(|id| self.resolver.resolve_identifier(id))
                .collect();
            let handler = VectorScopeHandler::new(
                kind,
                resolved,
                self.backends.clone(),
                self.settings.vector.clone(),
                request.options.clone(),
            );
            let handler: Arc<dyn SearchHandler> = Arc::new(handler);
            plan.handlers.push((handler, self.settings.handler_timeout));
        }

        for source in &sources {
            let SourceType::External(name) = source else {
                continue;
            };
            if !self.authorizer.is_authorized(caller, source) {
                tracing::debug!(source = %source, "source not authorized, dropped");
                continue;
            }
            match self.backends.federated_source(name) {
                Some(client) => {
                    let handler = ExternalSourceHandler::new(
                        name.clone(),
                        client,
                        caller.credential.clone(),
                        request.options.clone(),
                    );
                    let timeout = self
                        .settings
                        .external_timeouts
                        .get(name)
                        .copied()
                        .unwrap_or(self.settings.handler_timeout);
                    let handler: Arc<dyn SearchHandler> = Arc::new(handler);
                    plan.handlers.push((handler, timeout));
                }
                None => plan.unresolved.push(HandlerResult::failure(
                    source.clone(),
                    ErrorKind::NotFound,
                    format!("External source '{name}' is not configured"),
                    Duration::ZERO,
                )),
            }
        }

        Ok(plan)
    }

    /// One identifier per applicable collection filter, or the default index
    fn identifiers_for(
        &self,
        caller: &CallerContext,
        kind: ScopeKind,
        filters: &[CollectionFilter],
    ) -> Result<Vec<ScopeIdentifier>, ScopeError> {
        let user_id = caller.user_id.as_deref();
        if filters.is_empty() {
            return Ok(vec![ScopeIdentifier::new(
                &caller.tenant_id,
                kind,
                user_id,
                None,
            )?]);
        }

        let mut identifiers: Vec<ScopeIdentifier> = Vec::new();
        for filter in filters.iter().filter(|f| f.applies_to(kind)) {
            let id = ScopeIdentifier::new(
                &caller.tenant_id,
                kind,
                user_id,
                Some(&filter.collection_name),
            )?;
            if !identifiers.contains(&id) {
                identifiers.push(id);
            }
        }
        // Identity is still validated when no filter applies.
        if identifiers.is_empty() {
            ScopeIdentifier::new(&caller.tenant_id, kind, user_id, None)?;
        }
        Ok(identifiers)
    }
}

/// Run every handler on its own task under its own deadline.
///
/// Panics and timeouts become failed `HandlerResult`s; siblings are unaffected.
pub async fn dispatch(
    handlers: Vec<(Arc<dyn SearchHandler>, Duration)>,
    question: &str,
    top_k: usize,
    min_relevance_score: f64,
) -> Vec<HandlerResult> {
    let question: Arc<str> = Arc::from(question);
    let tasks = handlers.into_iter().map(|(handler, deadline)| {
        let source = handler.source_type();
        let question = Arc::clone(&question);
        let started = Instant::now();
        let task = tokio::spawn(
            async move {
                tokio::time::timeout(
                    deadline,
                    handler.search(&question, top_k, min_relevance_score),
                )
                .await
            }
            .in_current_span(),
        );
        async move {
            match task.await {
                Ok(Ok(result)) => {
                    tracing::debug!(
                        source = %result.source_type,
                        success = result.success,
                        count = result.results.len(),
                        elapsed_ms = result.elapsed.as_millis() as u64,
                        "handler finished"
                    );
                    result
                }
                Ok(Err(_elapsed)) => {
                    tracing::warn!(source = %source, timeout_ms = deadline.as_millis() as u64, "handler timed out");
                    HandlerResult::failure(
                        source,
                        ErrorKind::Timeout,
                        format!("no response within {}ms", deadline.as_millis()),
                        started.elapsed(),
                    )
                }
                Err(join_error) => {
                    tracing::error!(source = %source, error = %join_error, "handler task aborted");
                    HandlerResult::failure(
                        source,
                        ErrorKind::Internal,
                        format!("handler task aborted: {join_error}"),
                        started.elapsed(),
                    )
                }
            }
        }
    });
    join_all(tasks).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_requested_scopes() {
        assert_eq!("private".parse::<RequestedScope>(), Ok(RequestedScope::Private));
        assert_eq!("ALL".parse::<RequestedScope>(), Ok(RequestedScope::All));
        assert_eq!(
            "external:wiki".parse::<RequestedScope>(),
            Ok(RequestedScope::External("wiki".into()))
        );
        assert!("external:".parse::<RequestedScope>().is_err());
        assert!("public".parse::<RequestedScope>().is_err());
        assert_eq!(RequestedScope::External("wiki".into()).to_string(), "external:wiki");
    }

    #[test]
    fn expansion_dedupes_in_order() {
        let expanded = expand_scopes(&[
            RequestedScope::Shared,
            RequestedScope::All,
            RequestedScope::External("wiki".into()),
            RequestedScope::Private,
            RequestedScope::External("wiki".into()),
        ]);
        assert_eq!(
            expanded,
            vec![
                SourceType::Shared,
                SourceType::Private,
                SourceType::External("wiki".into())
            ]
        );
    }

    #[test]
    fn phases_are_ordered() {
        assert!(RequestPhase::Pending < RequestPhase::Dispatched);
        assert!(RequestPhase::Collected < RequestPhase::Done);
        assert_eq!(RequestPhase::Collected.to_string(), "COLLECTED");
    }
}
