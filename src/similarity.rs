//! Cosine scoring and deterministic top-k ranking.

use std::cmp::Ordering;

use crate::record::ScoredChunk;

/// Cosine similarity between two vectors, or 0.0 when the lengths differ or
/// either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let x = f64::from(*x);
        let y = f64::from(*y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Result ordering: similarity descending, then `(source, chunk_index)`
/// ascending so equal scores come back in a stable order.
pub fn compare_ranked(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.chunk_index.cmp(&b.chunk_index))
}

/// Sorts candidates and keeps the best `k`.
pub fn rank_top_k(mut candidates: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    if k == 0 {
        return Vec::new();
    }
    candidates.sort_by(compare_ranked);
    candidates.truncate(k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(source: &str, chunk_index: usize, similarity: f64) -> ScoredChunk {
        ScoredChunk {
            source: source.into(),
            content: String::new(),
            chunk_index,
            similarity,
        }
    }

    #[test]
    fn cosine_orders_similarities() {
        let q = [1.0, 0.0, 0.0];
        let a = [1.0, 0.0, 0.0];
        let b = [0.5, 0.5, 0.0];
        let c = [0.0, 1.0, 0.0];
        assert!((cosine_similarity(&q, &a) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&q, &a) > cosine_similarity(&q, &b));
        assert!(cosine_similarity(&q, &b) > cosine_similarity(&q, &c));
    }

    #[test]
    fn degenerate_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn opposite_vectors_score_negative() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn ties_break_by_source_then_index() {
        let ranked = rank_top_k(
            vec![
                scored("b.txt", 0, 0.5),
                scored("a.txt", 2, 0.5),
                scored("a.txt", 1, 0.5),
                scored("c.txt", 0, 0.9),
            ],
            3,
        );
        let order: Vec<_> = ranked
            .iter()
            .map(|c| (c.source.as_str(), c.chunk_index))
            .collect();
        assert_eq!(order, vec![("c.txt", 0), ("a.txt", 1), ("a.txt", 2)]);
    }

    #[test]
    fn zero_k_returns_nothing() {
        assert!(rank_top_k(vec![scored("a", 0, 1.0)], 0).is_empty());
    }
}
