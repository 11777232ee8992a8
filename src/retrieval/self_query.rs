use async_trait::async_trait;

use super::{RetrievalAlgorithm, RetrievalContext, StrategyKind};
use crate::config::StrategyConfig;
use crate::error::RagResult;
use crate::llm::self_query::construct_query;
use crate::models::RetrievalResult;

/// Let the model turn the question into a metadata filter plus residual
/// query, then search by similarity inside the filtered subset.
///
/// When filter construction fails the original query is searched unfiltered.
pub struct SelfQuery;

#[async_trait]
impl RetrievalAlgorithm for SelfQuery {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SelfQuery
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
        match construct_query(ctx.model.as_ref(), query, &ctx.attributes).await {
            Ok(structured) => {
                tracing::debug!(
                    "Structured query '{}' with filter {:?}",
                    structured.query,
                    structured.filter
                );
                ctx.dense_search(&structured.query, k, structured.filter.as_ref())
                    .await
            }
            Err(e) => {
                tracing::warn!("Filter construction failed, using plain similarity: {e:#}");
                ctx.dense_search(query, k, None).await
            }
        }
    }
}
