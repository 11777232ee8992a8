use async_trait::async_trait;

use super::{RetrievalAlgorithm, RetrievalContext, StrategyKind};
use crate::config::StrategyConfig;
use crate::error::RagResult;
use crate::models::RetrievalResult;
use crate::search::mmr::mmr_select;

/// Top-k by cosine similarity. With `mmr_lambda` set, `fetch_k` candidates
/// are re-selected by Maximal Marginal Relevance.
pub struct Similarity;

#[async_trait]
impl RetrievalAlgorithm for Similarity {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Similarity
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

        let k = config.result_count_k;
        match config.mmr_lambda {
            None => ctx.dense_search(query, k, None).await,
            Some(lambda) => {
                let candidates = ctx.dense_search(query, config.fetch_k(), None).await?;
                Ok(mmr_select(candidates, k, lambda))
            }
        }
    }
}
