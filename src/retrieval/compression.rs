use async_trait::async_trait;

use super::{RetrievalAlgorithm, RetrievalContext, StrategyKind};
use crate::chunking::TextSplitter;
use crate::config::StrategyConfig;
use crate::error::{RagError, RagResult};
use crate::models::{Passage, RetrievalResult, ScoredPassage};
use crate::search::vector::cosine_similarity;

/// Similarity search, then each hit is cut into `chunk_size` windows and
/// replaced by its window closest to the query. The set of hits, their
/// order and their scores are unchanged.
pub struct Compression;

#[async_trait]
impl RetrievalAlgorithm for Compression {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Compression
    }

    async fn retrieve(
        &self,
        ctx: &RetrievalContext,
        query: &str,
        config: &StrategyConfig,
    ) -> RagResult<RetrievalResult> {
        if ctx.index.is_empty() {
            return Ok(Vec::new());
        }

        let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap)?;
        let query_vector = ctx.embed_query(query).await?;
        let hits = ctx.search_vector(&query_vector, config.result_count_k, None)?;

        // (hit index, window text) for every hit that actually splits
        let mut windows: Vec<(usize, String)> = Vec::new();
        for (i, hit) in hits.iter().enumerate() {
            let parts = splitter.split(&hit.passage.text);
            if parts.len() > 1 {
                windows.extend(parts.into_iter().map(|w| (i, w)));
            }
        }
        if windows.is_empty() {
            return Ok(hits);
        }

        let texts: Vec<String> = windows.iter().map(|(_, w)| w.clone()).collect();
        let vectors = ctx
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| RagError::retrieval(format!("embedding failed: {e:#}")))?;

        let mut best: Vec<Option<(f32, usize)>> = vec![None; hits.len()];
        for (w, ((hit_idx, _), vector)) in windows.iter().zip(&vectors).enumerate() {
            let sim = cosine_similarity(&query_vector, vector);
            match best[*hit_idx] {
                Some((s, _)) if s >= sim => {}
                _ => best[*hit_idx] = Some((sim, w)),
            }
        }

        let compressed = hits
            .into_iter()
            .zip(best)
            .map(|(hit, pick)| match pick {
                None => hit,
                Some((_, w)) => {
                    let passage = Passage {
                        text: windows[w].1.clone(),
                        vector: vectors[w].clone(),
                        ..hit.passage
                    };
                    ScoredPassage::new(passage, hit.score)
                }
            })
            .collect();

        Ok(compressed)
    }
}
