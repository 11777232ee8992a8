use async_trait::async_trait;

use super::{RetrievalAlgorithm, RetrievalContext, StrategyKind};
use crate::config::StrategyConfig;
use crate::error::{RagError, RagResult};
use crate::models::RetrievalResult;
use crate::search::hybrid::weighted_fusion;

/// Dense similarity fused with BM25 over a cached lexical snapshot.
///
/// An empty corpus is an error here rather than an empty result, so the
/// caller never prompts the model without context.
pub struct HybridFusion;

#[async_trait]
impl RetrievalAlgorithm for HybridFusion {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HybridFusion
    }

    async fn retrieve(
        &self,
        ctx: &RetrievalContext,
        query: &str,
        config: &StrategyConfig,
    ) -> RagResult<RetrievalResult> {
        if ctx.index.is_empty() {
            return Err(RagError::empty_corpus());
        }

        let k = config.result_count_k;
        let lexical = ctx.lexical.get_or_build(ctx.index.as_ref()).await?;
        let dense = ctx.dense_search(query, k, None).await?;
        let sparse = lexical
            .search(query, config.sparse_k)
            .map_err(|e| RagError::Index(format!("{e:#}")))?;

        tracing::debug!(
            "Fusing {} dense and {} lexical hits (alpha={})",
            dense.len(),
            sparse.len(),
            config.fusion_weight_alpha
        );
        Ok(weighted_fusion(&dense, &sparse, config.fusion_weight_alpha, k))
    }
}
