use async_trait::async_trait;
use std::collections::HashSet;

use super::{RetrievalAlgorithm, RetrievalContext, StrategyKind};
use crate::config::StrategyConfig;
use crate::error::RagResult;
use crate::models::{RetrievalResult, ScoredPassage};

/// Search small child chunks, answer with their full parent documents.
///
/// Parents are deduplicated and scored by their best-matching child. A child
/// whose parent is unknown stands in for itself.
pub struct ParentDocument;

#[async_trait]
impl RetrievalAlgorithm for ParentDocument {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ParentDocument
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
        let children = ctx.dense_search(query, config.fetch_k(), None).await?;

        let mut seen = HashSet::new();
        let mut parents = Vec::with_capacity(k);
        for child in children {
            let passage = match ctx.parents.resolve(&child.passage) {
                Some(parent) => parent,
                None => {
                    if child.passage.parent_id().is_some() {
                        tracing::debug!("Parent of {} not found, using the chunk itself", child.id());
                    }
                    child.passage
                }
            };
            if seen.insert(passage.id.clone()) {
                parents.push(ScoredPassage::new(passage, child.score));
                if parents.len() == k {
                    break;
                }
            }
        }

        Ok(parents)
    }
}
