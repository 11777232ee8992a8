use std::fmt;
use std::sync::Arc;

use super::compression::Compression;
use super::hybrid::HybridFusion;
use super::multi_query::MultiQuery;
use super::parent_document::ParentDocument;
use super::self_query::SelfQuery;
use super::similarity::Similarity;
use super::RetrievalAlgorithm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Similarity,
    Compression,
    ParentDocument,
    MultiQuery,
    HybridFusion,
    SelfQuery,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::Similarity,
        StrategyKind::Compression,
        StrategyKind::ParentDocument,
        StrategyKind::MultiQuery,
        StrategyKind::HybridFusion,
        StrategyKind::SelfQuery,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            StrategyKind::Similarity => "similarity",
            StrategyKind::Compression => "compression",
            StrategyKind::ParentDocument => "parent-document",
            StrategyKind::MultiQuery => "multiquery",
            StrategyKind::HybridFusion => "hybrid-fusion",
            StrategyKind::SelfQuery => "self-query",
        }
    }

    /// Exact, case-insensitive match on the strategy id.
    pub fn parse(id: &str) -> Option<Self> {
        let id = id.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.id().eq_ignore_ascii_case(id))
    }

    pub fn algorithm(&self) -> Arc<dyn RetrievalAlgorithm> {
        match self {
            StrategyKind::Similarity => Arc::new(Similarity),
            StrategyKind::Compression => Arc::new(Compression),
            StrategyKind::ParentDocument => Arc::new(ParentDocument),
            StrategyKind::MultiQuery => Arc::new(MultiQuery),
            StrategyKind::HybridFusion => Arc::new(HybridFusion),
            StrategyKind::SelfQuery => Arc::new(SelfQuery),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Resolve a strategy id; unknown ids fall back to plain similarity.
pub fn dispatch(strategy_id: &str) -> Arc<dyn RetrievalAlgorithm> {
    match StrategyKind::parse(strategy_id) {
        Some(kind) => kind.algorithm(),
        None => {
            tracing::warn!("Unknown retrieval strategy '{strategy_id}', using similarity");
            StrategyKind::Similarity.algorithm()
        }
    }
}
