//! Narrow contracts for the external capabilities the orchestrator consumes
//!
//! Each capability is a trait taking explicit handles, so handlers receive
//! their clients at construction time and tests can substitute fakes:
//! - [`EmbeddingProvider`] turns a question into a dense vector
//! - [`VectorStore`] runs dense and sparse searches against a named index
//! - [`MetadataStore`] reads document metadata from object storage
//! - [`FederatedSearch`] queries an externally hosted search service
//! - [`CompletionProvider`] produces answer text from prompts

mod completion;
mod embedding;
mod federated;
pub mod http;
mod object_store;
mod vector_store;

pub use completion::{Completion, CompletionProvider, OpenAiCompletionProvider};
pub use embedding::{EmbeddingProvider, HttpEmbeddingProvider};
pub use federated::{Citation, FederatedRequest, FederatedResponse, FederatedSearch, HttpFederatedSearch};
pub use object_store::{DocumentMetadata, HttpMetadataStore, MetadataStore};
pub use vector_store::{DenseMetric, HttpVectorStore, VectorHit, VectorStore};

use crate::retrieval::ErrorKind;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Shared client handles, cloned into every handler the orchestrator builds
#[derive(Clone)]
pub struct Backends {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vector_store: Arc<dyn VectorStore>,
    /// Title enrichment is skipped when absent
    pub metadata: Option<Arc<dyn MetadataStore>>,
    /// Answer generation is disabled when absent
    pub completion: Option<Arc<dyn CompletionProvider>>,
    /// Federated sources by name
    pub federated: BTreeMap<String, Arc<dyn FederatedSearch>>,
}

impl Backends {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, vector_store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            vector_store,
            metadata: None,
            completion: None,
            federated: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionProvider>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn with_federated(mut self, name: impl Into<String>, source: Arc<dyn FederatedSearch>) -> Self {
        self.federated.insert(name.into(), source);
        self
    }

    pub fn federated_source(&self, name: &str) -> Option<Arc<dyn FederatedSearch>> {
        self.federated.get(name).cloned()
    }
}

/// Classified failure from any backend call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Authorization denied: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::BackendUnavailable,
            Self::Unauthorized(_) => ErrorKind::AuthorizationDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Malformed(_) => ErrorKind::MalformedResponse,
            Self::Rejected(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
