//! Quarry - multi-tenant query orchestration and hybrid ranking
//!
//! Takes one natural-language question, fans it out to a tenant's private
//! and shared vector indexes and to federated external sources, fuses the
//! ranked lists with Reciprocal Rank Fusion, filters by relevance and
//! synthesizes an answer from the best passages.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod handler;
pub mod orchestrator;
pub mod retrieval;
pub mod scope;

pub use error::{QuarryError, Result};
pub use orchestrator::{CallerContext, QueryOrchestrator, QueryRequest, RequestedScope};
pub use retrieval::{AggregatedResponse, SearchResult, SourceType};
pub use scope::{ScopeError, ScopeKind, ScopeResolver};
