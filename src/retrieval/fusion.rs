//! Reciprocal Rank Fusion of a dense and a sparse ranked list

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

/// Standard RRF smoothing constant
pub const DEFAULT_RRF_K: f64 = 60.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("Invalid RRF constant {0}: must be finite and non-negative")]
    InvalidK(f64),
}

/// Identity of one chunk within a backend
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub source_id: String,
    pub chunk_index: Option<i64>,
}

impl DocumentKey {
    pub fn new(source_id: impl Into<String>, chunk_index: Option<i64>) -> Self {
        Self {
            source_id: source_id.into(),
            chunk_index,
        }
    }
}

/// One document's standing in both lists. A `None` rank means the document
/// was absent from that list and contributes nothing from it.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedEntry {
    pub document_key: DocumentKey,
    pub dense_rank: Option<usize>,
    pub dense_score: Option<f64>,
    pub sparse_rank: Option<usize>,
    pub sparse_score: Option<f64>,
    pub fused_score: f64,
    /// `fused_score` on the 0-100 scale
    pub normalized_score: f64,
}

impl FusedEntry {
    pub fn in_both(&self) -> bool {
        self.dense_rank.is_some() && self.sparse_rank.is_some()
    }

    /// Better of the two raw scores, used only for tie-breaking
    fn best_raw_score(&self) -> f64 {
        match (self.dense_score, self.sparse_score) {
            (Some(d), Some(s)) => d.max(s),
            (Some(d), None) => d,
            (None, Some(s)) => s,
            (None, None) => f64::NEG_INFINITY,
        }
    }
}

/// Stateless RRF combiner: `1/(k + rank_dense) + 1/(k + rank_sparse)`
#[derive(Debug, Clone, Copy)]
pub struct HybridFusionEngine {
    k: f64,
}

impl Default for HybridFusionEngine {
    fn default() -> Self {
        Self { k: DEFAULT_RRF_K }
    }
}

impl HybridFusionEngine {
    pub fn new(k: f64) -> Result<Self, FusionError> {
        if !k.is_finite() || k < 0.0 {
            return Err(FusionError::InvalidK(k));
        }
        Ok(Self { k })
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    /// Highest fused score attainable given which lists contributed.
    ///
    /// An empty list cannot place anything at rank 1, so it adds nothing.
    pub fn max_possible(&self, dense_len: usize, sparse_len: usize) -> f64 {
        let per_list = 1.0 / (self.k + 1.0);
        let lists = usize::from(dense_len > 0) + usize::from(sparse_len > 0);
        per_list * lists as f64
    }

    /// Fuse two best-first lists of `(key, raw_score)` and keep the top `top_k`.
    ///
    /// A key repeated within one list keeps its first (best) position.
    /// Ordering: fused score, then presence in both lists, then the better
    /// raw score, then the key itself.
    pub fn fuse(
        &self,
        dense: &[(DocumentKey, f64)],
        sparse: &[(DocumentKey, f64)],
        top_k: usize,
    ) -> Vec<FusedEntry> {
        let dense = dedup_ranked(dense);
        let sparse = dedup_ranked(sparse);
        let max_possible = self.max_possible(dense.len(), sparse.len());

        let mut entries: HashMap<&DocumentKey, FusedEntry> = HashMap::new();

        for (position, (key, score)) in dense.iter().enumerate() {
            let rank = position + 1;
            let entry = entries.entry(*key).or_insert_with(|| empty_entry(key));
            entry.dense_rank = Some(rank);
            entry.dense_score = Some(*score);
            entry.fused_score += 1.0 / (self.k + rank as f64);
        }

        for (position, (key, score)) in sparse.iter().enumerate() {
            let rank = position + 1;
            let entry = entries.entry(*key).or_insert_with(|| empty_entry(key));
            entry.sparse_rank = Some(rank);
            entry.sparse_score = Some(*score);
            entry.fused_score += 1.0 / (self.k + rank as f64);
        }

        let mut fused: Vec<FusedEntry> = entries.into_values().collect();
        fused.sort_by(compare_entries);
        fused.truncate(top_k);

        for entry in &mut fused {
            entry.normalized_score = if max_possible > 0.0 {
                (entry.fused_score / max_possible * 100.0).clamp(0.0, 100.0)
            } else {
                0.0
            };
        }

        fused
    }
}

fn dedup_ranked(list: &[(DocumentKey, f64)]) -> Vec<(&DocumentKey, f64)> {
    let mut seen = std::collections::HashSet::new();
    list.iter()
        .filter(|(key, _)| seen.insert(key))
        .map(|(key, score)| (key, *score))
        .collect()
}

fn empty_entry(key: &DocumentKey) -> FusedEntry {
    FusedEntry {
        document_key: key.clone(),
        dense_rank: None,
        dense_score: None,
        sparse_rank: None,
        sparse_score: None,
        fused_score: 0.0,
        normalized_score: 0.0,
    }
}

fn compare_entries(a: &FusedEntry, b: &FusedEntry) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| b.in_both().cmp(&a.in_both()))
        .then_with(|| b.best_raw_score().total_cmp(&a.best_raw_score()))
        .then_with(|| a.document_key.cmp(&b.document_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> DocumentKey {
        DocumentKey::new(id, None)
    }

    #[test]
    fn rejects_negative_k() {
        assert!(HybridFusionEngine::new(-1.0).is_err());
        assert!(HybridFusionEngine::new(f64::NAN).is_err());
        assert!(HybridFusionEngine::new(0.0).is_ok());
    }

    #[test]
    fn document_in_both_lists_wins() {
        let engine = HybridFusionEngine::default();
        let dense = vec![(key("d1"), 0.9), (key("d2"), 0.8)];
        let sparse = vec![(key("d2"), 5.0), (key("d3"), 3.0)];

        let fused = engine.fuse(&dense, &sparse, 10);
        let order: Vec<&str> = fused
            .iter()
            .map(|e| e.document_key.source_id.as_str())
            .collect();
        assert_eq!(order, vec!["d2", "d1", "d3"]);

        assert!(fused[0].in_both());
        assert_eq!(fused[0].dense_rank, Some(2));
        assert_eq!(fused[0].sparse_rank, Some(1));
        assert_eq!(fused[2].dense_rank, None);
    }

    #[test]
    fn first_in_both_outranks_first_in_one() {
        let engine = HybridFusionEngine::default();
        let dense = vec![(key("both"), 0.5), (key("x"), 0.4)];
        let sparse = vec![(key("both"), 1.0), (key("solo"), 0.9)];
        let fused = engine.fuse(&dense, &[(key("solo"), 9.9)], 10);
        assert_eq!(fused[0].document_key, key("solo"));

        let fused = engine.fuse(&dense, &sparse, 10);
        assert_eq!(fused[0].document_key, key("both"));
        assert!((fused[0].normalized_score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn identical_inputs_give_identical_output() {
        let engine = HybridFusionEngine::default();
        let dense: Vec<_> = (0..20).map(|i| (key(&format!("d{}", i % 7)), 1.0 - i as f64 * 0.01)).collect();
        let sparse: Vec<_> = (0..20).map(|i| (key(&format!("d{}", (i * 3) % 11)), 20.0 - i as f64)).collect();
        assert_eq!(engine.fuse(&dense, &sparse, 15), engine.fuse(&dense, &sparse, 15));
    }

    #[test]
    fn ties_break_on_presence_then_raw_score_then_key() {
        let engine = HybridFusionEngine::default();
        // Both rank 1 in their single list: identical fused scores.
        let dense = vec![(key("b"), 0.7)];
        let sparse = vec![(key("a"), 0.7)];
        let fused = engine.fuse(&dense, &sparse, 10);
        assert_eq!(fused[0].document_key, key("a"));

        let sparse = vec![(key("a"), 0.2)];
        let fused = engine.fuse(&dense, &sparse, 10);
        assert_eq!(fused[0].document_key, key("b"));
    }

    #[test]
    fn truncates_to_top_k() {
        let engine = HybridFusionEngine::default();
        let dense: Vec<_> = (0..10).map(|i| (key(&format!("d{i}")), 1.0)).collect();
        let fused = engine.fuse(&dense, &[], 3);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].document_key, key("d0"));
    }

    #[test]
    fn single_list_normalizes_against_its_own_max() {
        let engine = HybridFusionEngine::default();
        let dense = vec![(key("d1"), 0.9), (key("d2"), 0.1)];
        let fused = engine.fuse(&dense, &[], 10);
        assert!((fused[0].normalized_score - 100.0).abs() < 1e-9);
        assert!(fused[1].normalized_score < 100.0);
    }

    #[test]
    fn scores_stay_within_bounds() {
        let engine = HybridFusionEngine::default();
        let dense: Vec<_> = (0..50).map(|i| (key(&format!("d{i}")), 1.0 / (i + 1) as f64)).collect();
        let sparse: Vec<_> = (0..50).rev().map(|i| (key(&format!("d{i}")), i as f64)).collect();
        for entry in engine.fuse(&dense, &sparse, 100) {
            assert!((0.0..=100.0).contains(&entry.normalized_score));
        }
    }

    #[test]
    fn repeated_key_keeps_best_rank() {
        let engine = HybridFusionEngine::default();
        let dense = vec![(key("a"), 0.9), (key("b"), 0.8), (key("a"), 0.1)];
        let fused = engine.fuse(&dense, &[], 10);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].dense_rank, Some(1));
        assert_eq!(fused[1].dense_rank, Some(2));
    }

    #[test]
    fn empty_inputs_yield_nothing() {
        let engine = HybridFusionEngine::default();
        assert!(engine.fuse(&[], &[], 10).is_empty());
        assert_eq!(engine.max_possible(0, 0), 0.0);
    }

    #[test]
    fn chunk_index_distinguishes_keys() {
        let engine = HybridFusionEngine::default();
        let dense = vec![(DocumentKey::new("doc", Some(0)), 0.9)];
        let sparse = vec![(DocumentKey::new("doc", Some(1)), 4.0)];
        assert_eq!(engine.fuse(&dense, &sparse, 10).len(), 2);
    }
}
