//! Maximal Marginal Relevance selection:
//! `mmr = lambda * relevance - (1 - lambda) * max_sim(candidate, selected)`.

use crate::models::{RetrievalResult, ScoredPassage};
use crate::search::vector::cosine_similarity;

/// Pick `k` passages from `candidates` trading relevance for diversity.
///
/// `candidates` carry their cosine relevance in `score`. Selected passages are
/// re-scored with the marginal value they had when picked, which never
/// increases from one pick to the next.
pub fn mmr_select(candidates: RetrievalResult, k: usize, lambda: f32) -> RetrievalResult {
    let lambda = lambda.clamp(0.0, 1.0);
    let mut remaining = candidates;
    let mut selected: Vec<ScoredPassage> = Vec::with_capacity(k.min(remaining.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_mmr = f32::NEG_INFINITY;

        for (idx, candidate) in remaining.iter().enumerate() {
            let max_similarity = selected
                .iter()
                .map(|s| cosine_similarity(&candidate.passage.vector, &s.passage.vector))
                .fold(0.0f32, f32::max);
            let mmr = lambda * candidate.score - (1.0 - lambda) * max_similarity;

            // Strict comparison keeps the earlier (more relevant) candidate on ties
            if mmr > best_mmr {
                best_mmr = mmr;
                best_idx = idx;
            }
        }

        let mut best = remaining.remove(best_idx);
        best.score = best_mmr;
        selected.push(best);
    }

    selected
}
