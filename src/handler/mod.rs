//! Search handlers: one search strategy against one backend
//!
//! A handler never fails with an error value. Every backend failure is
//! classified and folded into [`HandlerResult::failure`], so the
//! orchestrator can treat successes and failures uniformly.

mod external;
pub mod normalize;
pub mod prompt;
mod vector;

pub use external::ExternalSourceHandler;
pub use vector::{VectorHandlerSettings, VectorScopeHandler};

use crate::backend::BackendError;
use crate::retrieval::{ErrorKind, HandlerResult, SourceType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Caller presentation preferences, passed through to handlers untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_style: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl HandlerOptions {
    pub fn is_empty(&self) -> bool {
        self.tone.is_none()
            && self.language.is_none()
            && self.citation_style.is_none()
            && self.extra.is_empty()
    }
}

/// One search strategy against one backend
#[async_trait]
pub trait SearchHandler: Send + Sync {
    /// Which source this handler's results are attributed to
    fn source_type(&self) -> SourceType;

    /// Run the search. Infallible by contract: failures come back as
    /// `HandlerResult { success: false, .. }`.
    async fn search(&self, question: &str, top_k: usize, min_relevance_score: f64)
        -> HandlerResult;
}

#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    #[error("Embedding generation failed: {0}")]
    Embedding(BackendError),

    #[error("Search on index {index} failed: {source}")]
    Search { index: String, source: BackendError },

    #[error("Collection does not exist: {collection} (index {index})")]
    CollectionNotFound { collection: String, index: String },

    #[error("External source {source_name} failed: {error}")]
    External {
        source_name: String,
        error: BackendError,
    },
}

impl HandlerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Embedding(e) => e.kind(),
            Self::Search { source, .. } => source.kind(),
            Self::CollectionNotFound { .. } => ErrorKind::NotFound,
            Self::External { error, .. } => error.kind(),
        }
    }
}
