use std::collections::HashMap;

use crate::models::{Passage, RetrievalResult, ScoredPassage};

/// RRF constant.
const RRF_K: f32 = 60.0;
const TOP_RANK_BONUS: f32 = 0.05;

/// Weighted linear fusion of a dense (cosine) and a sparse (BM25) ranking.
///
/// Dense scores are mapped from [-1, 1] to [0, 1]; sparse scores are divided
/// by the best sparse score. A passage missing from one list scores 0 there.
/// `fused = alpha * dense + (1 - alpha) * sparse`. Equal fused scores keep the
/// order of the heavier-weighted list, so `alpha = 1` reproduces the dense
/// ranking and `alpha = 0` the lexical one.
pub fn weighted_fusion(
    dense: &[ScoredPassage],
    sparse: &[ScoredPassage],
    alpha: f32,
    limit: usize,
) -> RetrievalResult {
    struct Fused {
        passage: Passage,
        dense: f32,
        sparse: f32,
        dense_rank: usize,
        sparse_rank: usize,
    }

    let max_sparse = sparse.iter().map(|h| h.score).fold(0.0f32, f32::max);
    let mut fused: Vec<Fused> = Vec::with_capacity(dense.len() + sparse.len());
    let mut slots: HashMap<&str, usize> = HashMap::new();

    for (rank, hit) in dense.iter().enumerate() {
        if slots.contains_key(hit.id()) {
            continue;
        }
        slots.insert(hit.id(), fused.len());
        fused.push(Fused {
            passage: hit.passage.clone(),
            dense: ((hit.score + 1.0) / 2.0).clamp(0.0, 1.0),
            sparse: 0.0,
            dense_rank: rank,
            sparse_rank: usize::MAX,
        });
    }

    for (rank, hit) in sparse.iter().enumerate() {
        let norm = if max_sparse > 0.0 {
            (hit.score / max_sparse).clamp(0.0, 1.0)
        } else {
            0.0
        };
        match slots.get(hit.id()) {
            Some(&i) => {
                if fused[i].sparse_rank == usize::MAX {
                    fused[i].sparse = norm;
                    fused[i].sparse_rank = rank;
                }
            }
            None => {
                slots.insert(hit.id(), fused.len());
                fused.push(Fused {
                    passage: hit.passage.clone(),
                    dense: 0.0,
                    sparse: norm,
                    dense_rank: usize::MAX,
                    sparse_rank: rank,
                });
            }
        }
    }

    let dense_first = alpha >= 0.5;
    let score = |f: &Fused| alpha * f.dense + (1.0 - alpha) * f.sparse;
    let ranks = |f: &Fused| {
        if dense_first {
            (f.dense_rank, f.sparse_rank)
        } else {
            (f.sparse_rank, f.dense_rank)
        }
    };

    fused.sort_by(|a, b| {
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| ranks(a).cmp(&ranks(b)))
    });
    fused.truncate(limit);

    fused
        .into_iter()
        .map(|f| {
            let s = score(&f);
            ScoredPassage::new(f.passage, s)
        })
        .collect()
}

/// One ranked list from a single query variant.
pub struct QueryResults {
    pub hits: RetrievalResult,
    /// Weight multiplier for this query variant (original = 2.0, reformulated = 1.0)
    pub weight: f32,
}

/// Union of several ranked lists, deduplicated by passage id and ordered by
/// weighted Reciprocal Rank Fusion.
///
/// Each occurrence contributes `weight / (60 + rank + 1)`; passages ranked
/// first in any list get a +0.05 bonus. Equal scores keep first-appearance order.
pub fn rrf_union(query_results: &[QueryResults], limit: usize) -> RetrievalResult {
    let mut merged: Vec<(Passage, f32, bool)> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for qr in query_results {
        for (rank, hit) in qr.hits.iter().enumerate() {
            let rrf_score = qr.weight * (1.0 / (RRF_K + rank as f32 + 1.0));
            let i = *slots.entry(hit.id().to_string()).or_insert_with(|| {
                merged.push((hit.passage.clone(), 0.0, false));
                merged.len() - 1
            });
            merged[i].1 += rrf_score;
            if rank == 0 {
                merged[i].2 = true;
            }
        }
    }

    // Apply top-rank bonus
    for entry in merged.iter_mut() {
        if entry.2 {
            entry.1 += TOP_RANK_BONUS;
        }
    }

    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(limit);
    merged
        .into_iter()
        .map(|(p, score, _)| ScoredPassage::new(p, score))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> ScoredPassage {
        ScoredPassage::new(Passage::new(id, format!("text {id}")), score)
    }

    fn ids(r: &RetrievalResult) -> Vec<&str> {
        r.iter().map(|h| h.id()).collect()
    }

    fn dense() -> Vec<ScoredPassage> {
        vec![hit("a", 0.9), hit("b", 0.8), hit("c", 0.1)]
    }

    fn sparse() -> Vec<ScoredPassage> {
        vec![hit("c", 7.0), hit("d", 3.5), hit("a", 1.0)]
    }

    #[test]
    fn test_alpha_one_reproduces_dense_order() {
        let fused = weighted_fusion(&dense(), &sparse(), 1.0, 3);
        assert_eq!(ids(&fused), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_alpha_zero_reproduces_sparse_order() {
        let fused = weighted_fusion(&dense(), &sparse(), 0.0, 3);
        assert_eq!(ids(&fused), vec!["c", "d", "a"]);
    }

    #[test]
    fn test_balanced_fusion_rewards_agreement() {
        // c: 0.5 * 0.55 + 0.5 * 1.0 beats a: 0.5 * 0.95 + 0.5 * (1/7)
        let fused = weighted_fusion(&dense(), &sparse(), 0.5, 4);
        assert_eq!(ids(&fused), vec!["c", "a", "b", "d"]);
        assert!(fused.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_fusion_respects_limit() {
        assert_eq!(weighted_fusion(&dense(), &sparse(), 0.5, 2).len(), 2);
    }

    #[test]
    fn test_fusion_empty_sparse() {
        let fused = weighted_fusion(&dense(), &[], 0.3, 3);
        assert_eq!(ids(&fused), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rrf_union_dedups_and_weights_original() {
        let lists = vec![
            QueryResults {
                hits: vec![hit("a", 0.9), hit("b", 0.8)],
                weight: 2.0,
            },
            QueryResults {
                hits: vec![hit("b", 0.7), hit("c", 0.6)],
                weight: 1.0,
            },
        ];
        let merged = rrf_union(&lists, 10);
        assert_eq!(merged.len(), 3);
        // b: 2/62 + 1/61 + bonus beats a: 2/61 + bonus
        assert_eq!(ids(&merged), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_rrf_union_truncates() {
        let lists = vec![QueryResults {
            hits: vec![hit("a", 0.9), hit("b", 0.8), hit("c", 0.7)],
            weight: 1.0,
        }];
        assert_eq!(ids(&rrf_union(&lists, 2)), vec!["a", "b"]);
    }

    #[test]
    fn test_rrf_union_empty() {
        assert!(rrf_union(&[], 5).is_empty());
    }
}
