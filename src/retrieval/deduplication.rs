//! Result deduplication by (source, document, chunk)

use crate::retrieval::{SearchResult, SourceType};
use std::collections::HashSet;

/// Deduplicate results by source, document id and chunk index, keeping the
/// first instance.
///
/// # Arguments
/// * `results` - Results sorted best-first, potentially with duplicates
///
/// # Returns
/// Deduplicated results, maintaining score order
pub fn deduplicate_results(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen: HashSet<(SourceType, String, Option<i64>)> = HashSet::new();

    results
        .into_iter()
        .filter(|r| seen.insert((r.source_type.clone(), r.source_id.clone(), r.chunk_index)))
        .collect()
}
