//! Result model and rank fusion
//!
//! Handlers normalize every backend's scores onto a common 0-100 scale and
//! emit [`SearchResult`]s; dense and sparse lists from one index are merged
//! with Reciprocal Rank Fusion before leaving the handler.

mod deduplication;
mod fusion;
mod results;

pub use deduplication::deduplicate_results;
pub use fusion::{DocumentKey, FusedEntry, FusionError, HybridFusionEngine, DEFAULT_RRF_K};
pub use results::{
    sort_by_score_desc, AggregatedResponse, AnswerOrigin, ErrorKind, HandlerFailure,
    HandlerResult, SearchResult, SourceFailure, SourceType,
};

use serde::{Deserialize, Serialize};

/// Which search strategies a vector scope handler runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Dense and sparse, merged with RRF
    #[default]
    Hybrid,
    /// Dense vector similarity only
    Semantic,
    /// Sparse/keyword only
    Keyword,
}

impl SearchMode {
    pub fn uses_dense(&self) -> bool {
        matches!(self, Self::Hybrid | Self::Semantic)
    }

    pub fn uses_sparse(&self) -> bool {
        matches!(self, Self::Hybrid | Self::Keyword)
    }

    /// Candidates to request per list for a final `top_k`
    pub fn candidate_limit(&self, top_k: usize) -> usize {
        match self {
            Self::Hybrid => top_k.saturating_mul(2),
            Self::Semantic | Self::Keyword => top_k,
        }
    }
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "semantic" => Ok(Self::Semantic),
            "keyword" => Ok(Self::Keyword),
            other => Err(format!(
                "search mode must be 'hybrid', 'semantic' or 'keyword', got '{other}'"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hybrid_doubles_candidates() {
        assert_eq!(SearchMode::Hybrid.candidate_limit(5), 10);
        assert_eq!(SearchMode::Semantic.candidate_limit(5), 5);
        assert_eq!(SearchMode::Keyword.candidate_limit(5), 5);
    }

    #[test]
    fn parses_modes() {
        assert_eq!("Hybrid".parse::<SearchMode>(), Ok(SearchMode::Hybrid));
        assert_eq!("keyword".parse::<SearchMode>(), Ok(SearchMode::Keyword));
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }
}
