use async_trait::async_trait;
use futures_util::future::try_join_all;

use super::{RetrievalAlgorithm, RetrievalContext, StrategyKind};
use crate::config::StrategyConfig;
use crate::error::RagResult;
use crate::llm::query_expand::reformulate;
use crate::models::RetrievalResult;
use crate::search::hybrid::{rrf_union, QueryResults};

const ORIGINAL_WEIGHT: f32 = 2.0;
const REFORMULATED_WEIGHT: f32 = 1.0;

/// Ask the model for reformulations, search each variant in parallel and
/// merge the lists with weighted RRF.
///
/// If reformulation fails or yields nothing, the original query is searched alone.
pub struct MultiQuery;

impl MultiQuery {
    /// Query variants with their fusion weights, original first when included.
    pub async fn query_variants(
        &self,
        ctx: &RetrievalContext,
        query: &str,
        config: &StrategyConfig,
    ) -> Vec<(String, f32)> {
        let reformulations = match reformulate(ctx.model.as_ref(), query, config.query_count).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Query reformulation failed, searching the original only: {e:#}");
                Vec::new()
            }
        };

        let mut variants = Vec::with_capacity(reformulations.len() + 1);
        if config.include_original || reformulations.is_empty() {
            variants.push((query.to_string(), ORIGINAL_WEIGHT));
        }
        for r in reformulations {
            if !r.trim().eq_ignore_ascii_case(query.trim()) {
                variants.push((r, REFORMULATED_WEIGHT));
            }
        }
        if variants.is_empty() {
            variants.push((query.to_string(), ORIGINAL_WEIGHT));
        }
        variants
    }

    /// One ranked candidate list per variant, before union.
    pub async fn candidate_lists(
        &self,
        ctx: &RetrievalContext,
        query: &str,
        config: &StrategyConfig,
    ) -> RagResult<Vec<QueryResults>> {
        let variants = self.query_variants(ctx, query, config).await;
        tracing::debug!("Searching {} query variants", variants.len());

        let k = config.result_count_k;
        let searches = variants.iter().map(|(variant, weight)| async move {
            let hits = ctx.dense_search(variant, k, None).await?;
            Ok::<_, crate::error::RagError>(QueryResults {
                hits,
                weight: *weight,
            })
        });
        try_join_all(searches).await
    }
}

#[async_trait]
impl RetrievalAlgorithm for MultiQuery {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MultiQuery
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

        let lists = self.candidate_lists(ctx, query, config).await?;
        Ok(rrf_union(&lists, config.result_count_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, ScriptedModel};
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_original_query_included_first() {
        let model = Arc::new(
            ScriptedModel::new().with_completion(r#"["bus ticket price", "cost of a day pass"]"#),
        );
        let ctx = context(model.clone()).await;
        let variants = MultiQuery
            .query_variants(&ctx, "fares", &StrategyConfig::default())
            .await;
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0], ("fares".to_string(), ORIGINAL_WEIGHT));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_reformulation_failure_falls_back_to_original() {
        // No scripted completion: the model call errors
        let ctx = context(Arc::new(ScriptedModel::new())).await;
        let config = StrategyConfig {
            include_original: false,
            ..StrategyConfig::default()
        };
        let variants = MultiQuery.query_variants(&ctx, "fares", &config).await;
        assert_eq!(variants, vec![("fares".to_string(), ORIGINAL_WEIGHT)]);

        let hits = MultiQuery.retrieve(&ctx, "fares", &config).await.unwrap();
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn test_result_is_deduplicated_and_bounded() {
        let model = Arc::new(
            ScriptedModel::new().with_completion(r#"["bus fare", "night bus", "office hours"]"#),
        );
        let ctx = context(model).await;
        let config = StrategyConfig::default().with_k(2);
        let hits = MultiQuery.retrieve(&ctx, "bus", &config).await.unwrap();
        assert_eq!(hits.len(), 2);
        let unique: HashSet<&str> = hits.iter().map(|h| h.id()).collect();
        assert_eq!(unique.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }
}
